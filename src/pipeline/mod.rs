//! Merge drivers: run several scrapers side by side and fold their results.
//!
//! ## Drivers
//!
//! `merge_all()`: one task per scraper, results deep-merged in input order.
//!
//! `merge_fixed()`: build `count` scrapers from a factory first, then `merge_all()`.
//!   Pair with a shared `WorkQueue` so the instances split the work.
//!
//! `merge_as_list()`: like `merge_all()`, but every top-level value is kept
//!   as its own list entry instead of being folded together.
//!
//! A failing scraper fails the whole merge; nothing is isolated.

use crate::backend::Backend;
use crate::merge::{self, ResultMap};
use crate::scraper::Scraper;
use crate::utils::Timer;
use anyhow::{Context, Result};
use std::future::Future;
use tracing::{error, info};

/// Run every scraper concurrently and return their results in input order.
async fn run_all<B: Backend>(scrapers: Vec<Scraper<B>>) -> Result<Vec<ResultMap>> {
    let mut handles = Vec::with_capacity(scrapers.len());

    for (i, mut scraper) in scrapers.into_iter().enumerate() {
        let handle = tokio::spawn(async move {
            let result = scraper.run().await;
            (scraper.stats(), result)
        });
        handles.push((i, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (i, handle) in handles {
        match handle.await {
            Ok((stats, Ok(result))) => {
                info!(
                    "Scraper #{}: {} pages, {} top-level keys",
                    i,
                    stats.pages_visited,
                    result.len()
                );
                results.push(result);
            }
            Ok((_, Err(e))) => return Err(e).with_context(|| format!("Scraper #{} failed", i)),
            Err(e) => {
                error!("Task panic for scraper #{}: {}", i, e);
                return Err(e).with_context(|| format!("Scraper #{} panicked", i));
            }
        }
    }
    Ok(results)
}

pub async fn merge_all<B: Backend>(scrapers: Vec<Scraper<B>>) -> Result<ResultMap> {
    let _t = Timer::start(format!("{} scraper(s) run + merge", scrapers.len()));

    let mut merged = ResultMap::new();
    for result in run_all(scrapers).await? {
        merge::merge_maps(&mut merged, result).context("Merging scraper results")?;
    }
    Ok(merged)
}

pub async fn merge_fixed<B, F, Fut>(mut factory: F, count: usize) -> Result<ResultMap>
where
    B: Backend,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Scraper<B>>>,
{
    let mut scrapers = Vec::with_capacity(count);
    for i in 0..count {
        scrapers.push(
            factory()
                .await
                .with_context(|| format!("Building scraper #{}", i))?,
        );
    }
    merge_all(scrapers).await
}

pub async fn merge_as_list<B: Backend>(scrapers: Vec<Scraper<B>>) -> Result<ResultMap> {
    let _t = Timer::start(format!("{} scraper(s) run + list merge", scrapers.len()));

    let mut merged = ResultMap::new();
    for result in run_all(scrapers).await? {
        merge::merge_maps(&mut merged, merge::wrap_as_list(result))
            .context("Merging scraper results")?;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Element;
    use crate::queue::{Claims, WorkQueue};
    use crate::scraper::tests::FixtureBackend;
    use serde_json::{Value, json};

    fn constant(value: Value) -> Scraper<FixtureBackend> {
        let mut scraper = Scraper::new(FixtureBackend::with_pages(&[("p", "<p>x</p>")]));
        scraper.register_group("c", "p").scrape(move |_page| {
            let value = value.clone();
            Box::pin(async move { Ok(Some(value)) })
        });
        scraper
    }

    #[tokio::test]
    async fn test_merge_all_deep_merges() {
        let merged = merge_all(vec![
            constant(json!({"a": {"x": 1}})),
            constant(json!({"a": {"y": 2}, "b": [1]})),
        ])
        .await
        .unwrap();
        assert_eq!(Value::Object(merged), json!({"a": {"x": 1, "y": 2}, "b": [1]}));
    }

    #[tokio::test]
    async fn test_merge_as_list_keeps_instances_apart() {
        let merged = merge_as_list(vec![
            constant(json!({"co": {"name": "A"}})),
            constant(json!({"co": {"name": "B"}, "extra": 1})),
        ])
        .await
        .unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({"co": [{"name": "A"}, {"name": "B"}], "extra": [1]})
        );
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_merge() {
        let mut broken = Scraper::new(FixtureBackend::with_pages(&[]));
        broken.register_group("g", "nowhere");
        let err = merge_all(vec![constant(json!({"a": 1})), broken])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Scraper #1 failed"));
    }

    #[tokio::test]
    async fn test_merge_fixed_splits_a_work_queue() {
        let pages = [
            ("/eq/a", "<h1>A</h1>"),
            ("/eq/b", "<h1>B</h1>"),
            ("/eq/c", "<h1>C</h1>"),
            ("/eq/a-ratios", "<table><tr><td>1</td></tr></table>"),
            ("/eq/b-ratios", "<table><tr><td>2</td></tr></table>"),
            ("/eq/c-ratios", "<table><tr><td>3</td></tr></table>"),
        ];
        let queue = WorkQueue::new(["a", "b", "c"]);

        let merged = merge_fixed(
            || {
                let queue = queue.clone();
                async move {
                    let claims = Claims::new();
                    let mut scraper = Scraper::new(FixtureBackend::with_pages(&pages));
                    scraper
                        .register_group("names", queue.claim_urls(&claims, |c| format!("/eq/{c}")))
                        .scrape(|page| {
                            Box::pin(async move {
                                let name = page.query_single("h1").await.text().await;
                                Ok(Some(json!({ "names": [name] })))
                            })
                        });

                    let current = claims.clone();
                    scraper
                        .register_group("ratios", claims.replay_urls(|c| format!("/eq/{c}-ratios")))
                        .scrape(move |page| {
                            let company = current.current();
                            Box::pin(async move {
                                let ratio = page.query_single("td").await.text_as("int", &[]).await?;
                                Ok(Some(json!({ "ratios": [{ "company": company, "value": ratio }] })))
                            })
                        });
                    Ok(scraper)
                }
            },
            2,
        )
        .await
        .unwrap();

        let mut names: Vec<String> = merged["names"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["A", "B", "C"]);

        let ratios = merged["ratios"].as_array().unwrap();
        assert_eq!(ratios.len(), 3);
        for r in ratios {
            let expected = match r["company"].as_str().unwrap() {
                "a" => 1,
                "b" => 2,
                "c" => 3,
                other => panic!("unexpected company {other}"),
            };
            assert_eq!(r["value"], json!(expected));
        }
        assert!(queue.is_empty());
    }
}
