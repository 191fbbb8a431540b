use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fluent_scrape::backend::{Backend, BrowserBackend, Headers, HttpBackend, merge_headers};
use fluent_scrape::config::{AppConfig, BackendKind, OutputFormat};
use fluent_scrape::document::Element;
use fluent_scrape::pipeline;
use fluent_scrape::queue::{Claims, WorkQueue};
use fluent_scrape::scraper::{Page, Scraper};
use fluent_scrape::{convert, output, utils};

#[derive(Parser)]
#[command(name = "fluent-scrape", about = "Declarative page scraping to JSON/CSV", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Extract fields from one or more pages
    Scrape {
        /// Page to visit; repeat for several pages
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,

        /// Row selector; every match becomes one record
        #[arg(short, long)]
        select: Option<String>,

        /// Field as `name=selector[@attr][|tag[:arg]]`; repeatable
        #[arg(short, long = "field", required = true)]
        fields: Vec<FieldSpec>,

        /// Extra request header as `Name: value`; repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Fetch mechanism (defaults to config)
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,

        /// Scraper instances sharing the URL list (defaults to config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Output format (defaults to config)
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Result key the records are collected under
        #[arg(short, long, default_value = "rows")]
        key: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List registered converter tags
    Converters,

    /// Run one conversion and print the JSON value
    Convert {
        raw: String,
        tag: String,
        args: Vec<String>,
    },

    /// Print the resolved configuration
    Config,
}

// ── Field specs ──────────────────────────────────────────────────────────────

/// One output column: where to read it and how to convert it.
#[derive(Debug, Clone, PartialEq)]
struct FieldSpec {
    name: String,
    /// Empty means the row element itself.
    selector: String,
    attr: Option<String>,
    tag: String,
    args: Vec<String>,
}

impl FromStr for FieldSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("expected name=selector, got {:?}", s))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("empty field name in {:?}", s));
        }

        let (location, conversion) = match rest.rsplit_once('|') {
            Some((loc, conv)) => (loc, Some(conv.trim())),
            None => (rest, None),
        };
        let (tag, args) = match conversion {
            Some(conv) => match conv.split_once(':') {
                Some((tag, arg)) => (tag.trim().to_string(), vec![arg.to_string()]),
                None => (conv.to_string(), Vec::new()),
            },
            None => ("str".to_string(), Vec::new()),
        };
        if tag.is_empty() {
            return Err(format!("empty converter tag in {:?}", s));
        }

        let (selector, attr) = match location.rsplit_once('@') {
            Some((sel, attr)) if !attr.trim().is_empty() => {
                (sel.trim().to_string(), Some(attr.trim().to_string()))
            }
            _ => (location.trim().to_string(), None),
        };

        Ok(Self {
            name: name.to_string(),
            selector,
            attr,
            tag,
            args,
        })
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Header {:?} is not `Name: value`", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Configured headers overridden by `-H` flags, names compared case-insensitively.
fn request_headers(configured: &Headers, flags: &[String]) -> Result<Headers> {
    let mut merged = Headers::new();
    merge_headers(&mut merged, configured);
    for raw in flags {
        let (name, value) = parse_header(raw)?;
        merge_headers(&mut merged, [(name, value)]);
    }
    Ok(merged)
}

// ── Extraction ───────────────────────────────────────────────────────────────

struct ExtractPlan {
    key: String,
    rows: Option<String>,
    fields: Vec<FieldSpec>,
}

impl ExtractPlan {
    fn validate(&self) -> Result<()> {
        if self.rows.is_none() {
            if let Some(f) = self.fields.iter().find(|f| f.selector.is_empty()) {
                bail!("Field '{}' has no selector and there is no --select", f.name);
            }
        }
        Ok(())
    }

    async fn read<E: Element>(field: &FieldSpec, el: &E) -> Result<Value> {
        let args: Vec<&str> = field.args.iter().map(String::as_str).collect();
        let value = match &field.attr {
            Some(attr) => el.attribute_as(attr, &field.tag, &args).await,
            None => el.text_as(&field.tag, &args).await,
        };
        value.with_context(|| format!("Field '{}'", field.name))
    }

    async fn record<E: Element>(&self, row: &E) -> Result<Value> {
        let mut record = Map::new();
        for field in &self.fields {
            let value = if field.selector.is_empty() {
                Self::read(field, row).await?
            } else {
                Self::read(field, &row.query_single(&field.selector).await).await?
            };
            record.insert(field.name.clone(), value);
        }
        Ok(Value::Object(record))
    }

    async fn extract<B: Backend>(&self, page: &Page<'_, B>) -> Result<Value> {
        let mut records = Vec::new();
        match &self.rows {
            Some(rows) => {
                for row in page.query_all(rows).await {
                    records.push(self.record(&row).await?);
                }
            }
            None => {
                let mut record = Map::new();
                for field in &self.fields {
                    let el = page.query_single(&field.selector).await;
                    record.insert(field.name.clone(), Self::read(field, &el).await?);
                }
                records.push(Value::Object(record));
            }
        }
        info!("{}: {} record(s)", page.url(), records.len());
        let mut partial = Map::new();
        partial.insert(self.key.clone(), Value::Array(records));
        Ok(Value::Object(partial))
    }
}

fn build_scraper<B: Backend>(
    backend: B,
    queue: &WorkQueue,
    plan: &Arc<ExtractPlan>,
    headers: &Headers,
) -> Scraper<B> {
    let mut scraper = Scraper::new(backend);
    if !headers.is_empty() {
        scraper.set_global_headers(headers.clone());
    }

    let claims = Claims::new();
    let plan = Arc::clone(plan);
    scraper
        .register_group("pages", queue.claim_urls(&claims, |url| url.to_string()))
        .scrape(move |page| {
            let plan = Arc::clone(&plan);
            Box::pin(async move { plan.extract(page).await.map(Some) })
        });
    scraper
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "fluent_scrape=info,warn",
        1 => "fluent_scrape=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape {
            urls,
            select,
            fields,
            headers,
            backend,
            workers,
            format,
            key,
            out,
        } => {
            let _t = utils::Timer::start(format!("Scrape of {} URL(s)", urls.len()));

            let plan = Arc::new(ExtractPlan {
                key: key.clone(),
                rows: select,
                fields,
            });
            plan.validate()?;

            let global = request_headers(&config.http.headers, &headers)?;

            let workers = workers.unwrap_or(config.pipeline.workers).max(1);
            let queue = WorkQueue::new(urls);

            let result = match backend.unwrap_or(config.pipeline.backend) {
                BackendKind::Http => {
                    let mut scrapers = Vec::with_capacity(workers);
                    for _ in 0..workers {
                        let backend = HttpBackend::new(&config.http)?;
                        scrapers.push(build_scraper(backend, &queue, &plan, &global));
                    }
                    pipeline::merge_all(scrapers).await?
                }
                BackendKind::Browser => {
                    let options = config.browser.clone();
                    pipeline::merge_fixed(
                        || {
                            let (options, queue, plan, global) =
                                (options.clone(), queue.clone(), plan.clone(), global.clone());
                            async move {
                                let backend = BrowserBackend::launch(&options).await?;
                                Ok(build_scraper(backend, &queue, &plan, &global))
                            }
                        },
                        workers,
                    )
                    .await?
                }
            };

            let format = format.unwrap_or(config.output.format);
            let rendered = output::render(&result, format, config.output.pretty, Some(&key))?;
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("Writing {:?}", path))?;
                    info!("Wrote {:?}", path);
                }
                None => println!("{}", rendered),
            }
        }

        Command::Converters => {
            let mut names = convert::registered_names();
            names.sort();
            println!("{} converters (append _or_none or _or_noneD for soft failure):", names.len());
            for n in &names {
                println!("  {}", n);
            }
        }

        Command::Convert { raw, tag, args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let value = convert::convert(&raw, &tag, &args)?;
            println!("{}", value);
        }

        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
