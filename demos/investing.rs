//! Company key facts plus balance sheet, cash flow and income statement
//! tables from investing.com, split across one scraper per company.
//!
//! ```text
//! cargo run --example investing -- apple-computer-inc microsoft-corp
//! ```

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use fluent_scrape::backend::{Headers, HttpBackend};
use fluent_scrape::config::{AppConfig, HttpConfig};
use fluent_scrape::document::Element;
use fluent_scrape::queue::{Claims, WorkQueue};
use fluent_scrape::scraper::Scraper;
use fluent_scrape::{convert, output, pipeline};

const BASE_URL: &str = "https://www.investing.com/equities/";

const STATEMENTS: [(&str, &str); 3] = [
    ("-balance-sheet", "balance_sheet_data"),
    ("-cash-flow", "cash_flow_data"),
    ("-income-statement", "income_statement_data"),
];

/// Statement cells: `-` means no figure, numbers use `,` grouping.
fn statement_cell(raw: &str, _args: &[&str]) -> Result<Value> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" {
        return Ok(Value::Null);
    }
    let n: f64 = raw
        .replace(',', "")
        .parse()
        .with_context(|| format!("not a figure: {:?}", raw))?;
    Ok(json!(n))
}

async fn text_at<E: Element>(el: &E, path: &str) -> Option<String> {
    el.query_single(path).await.text().await
}

async fn company_info<E: Element>(root: &E) -> Option<Value> {
    let rows = root.query_all("dl > div").await;
    if rows.is_empty() {
        return None;
    }
    let mut infos = Vec::with_capacity(rows.len());
    for row in &rows {
        infos.push(json!({
            "name": text_at(row, "dt").await,
            "value": text_at(row, "dd").await,
        }));
    }
    Some(json!({ "infos": infos }))
}

async fn row_values<E: Element>(row: &E, periods: usize) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(periods);
    for i in 2..2 + periods {
        let cell = row.query_single(&format!("td:nth-child({})", i)).await;
        values.push(cell.text_as("statement", &[]).await?);
    }
    Ok(values)
}

/// Sections hold child rows, child rows hold "grand" rows.
async fn statement_table<E: Element>(table: &E) -> Result<Option<Value>> {
    if table.is_absent() {
        return Ok(None);
    }

    let mut headers = Vec::new();
    for th in table.query_all("tr#header_row > th:nth-child(n+2)").await {
        let year = text_at(&th, "span").await.unwrap_or_default();
        let other = text_at(&th, "div").await.unwrap_or_default();
        headers.push(Value::String(format!("{}/{}", other, year)));
    }
    let periods = headers.len();

    let mut sections: Vec<Value> = Vec::new();
    for tr in table.query_all("tbody tr").await {
        let class = tr.attribute("class").await.unwrap_or_default();
        let is_nested = class.contains("child") || class.contains("grand");
        // rows wrapping a nested child table carry their own id
        if !is_nested && tr.attribute("id").await.is_some_and(|id| id != "parentTr") {
            continue;
        }
        let Some(name) = text_at(&tr, "td:nth-child(1) > span").await else {
            continue;
        };
        let values = row_values(&tr, periods).await?;

        if class.contains("grand") {
            let child = sections
                .last_mut()
                .and_then(|s| s["inner_data"].as_array_mut())
                .and_then(|children| children.last_mut())
                .and_then(|c| c["inner_data"].as_array_mut());
            if let Some(grand) = child {
                grand.push(json!({ "name": name, "values": values }));
            }
        } else if class.contains("child") {
            if let Some(children) = sections
                .last_mut()
                .and_then(|s| s["inner_data"].as_array_mut())
            {
                children.push(json!({ "name": name, "values": values, "inner_data": [] }));
            }
        } else {
            sections.push(json!({ "name": name, "values": values, "inner_data": [] }));
        }
    }

    Ok(Some(json!({ "headers": headers, "sections": sections })))
}

/// `{ key: [data + company_name] }`
fn per_company(mut data: Value, key: &str, company: Option<String>) -> Value {
    data["company_name"] = json!(company);
    let mut partial = Map::new();
    partial.insert(key.to_string(), Value::Array(vec![data]));
    Value::Object(partial)
}

fn investing_scraper(queue: &WorkQueue, http: &HttpConfig) -> Result<Scraper<HttpBackend>> {
    let mut scraper = Scraper::new(HttpBackend::new(http)?);
    let mut headers = Headers::new();
    headers.insert("Accept".into(), "*/*".into());
    scraper.set_global_headers(headers);

    let claims = Claims::new();

    let current = claims.clone();
    scraper
        .register_group(
            "key-info",
            queue.claim_urls(&claims, |company| format!("{}{}", BASE_URL, company)),
        )
        .scrape(move |page| {
            let company = current.current();
            Box::pin(async move {
                let root = page.query_single("div[data-test='key-info']").await;
                let info = company_info(&root).await;
                Ok(info.map(|i| per_company(i, "company_info", company)))
            })
        });

    for (suffix, key) in STATEMENTS {
        let current = claims.clone();
        scraper
            .register_group(
                key,
                claims.replay_urls(move |company| format!("{}{}{}", BASE_URL, company, suffix)),
            )
            .scrape(move |page| {
                let company = current.current();
                Box::pin(async move {
                    let table = page.query_single("#rrtable > table").await;
                    let data = statement_table(&table).await?;
                    Ok(data.map(|d| per_company(d, key, company)))
                })
            });
    }

    Ok(scraper)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new("fluent_scrape=info,warn"))
        .init();

    convert::register("statement", statement_cell);

    let mut companies: Vec<String> = std::env::args().skip(1).collect();
    if companies.is_empty() {
        companies.push("apple-computer-inc".to_string());
    }

    let config = AppConfig::load()?;
    let queue = WorkQueue::new(companies);
    let count = queue.len();

    let result = pipeline::merge_fixed(
        || {
            let queue = queue.clone();
            let http = config.http.clone();
            async move { investing_scraper(&queue, &http) }
        },
        count,
    )
    .await?;

    println!("{}", output::to_json(&result, true)?);
    Ok(())
}
