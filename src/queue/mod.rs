//! Explicit pagination state for multi-page, multi-scraper runs.
//!
//! A [`WorkQueue`] is shared by every scraper instance: each one pops
//! items (company slugs, tickers, ...) until the queue is drained, so the
//! work is spread across instances. A scraper records what it popped in
//! its own [`Claims`]; follow-up groups replay those claims to visit
//! further pages for the same items.

use crate::scraper::UrlSource;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone, Default, Debug)]
pub struct WorkQueue {
    items: Arc<Mutex<VecDeque<String>>>,
}

impl WorkQueue {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: Arc::new(Mutex::new(items.into_iter().map(Into::into).collect())),
        }
    }

    pub fn pop(&self) -> Option<String> {
        self.items.lock().ok()?.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// URLs built from items popped off this queue until it runs dry.
    /// Every popped item is recorded in `claims`.
    pub fn claim_urls<F>(&self, claims: &Claims, make_url: F) -> UrlSource
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let queue = self.clone();
        let claims = claims.clone();
        UrlSource::from_fn(move || {
            let item = queue.pop()?;
            debug!("Claimed {}", item);
            claims.record(&item);
            Some(make_url(&item))
        })
    }
}

#[derive(Default, Debug)]
struct ClaimState {
    claimed: Vec<String>,
    current: Option<String>,
}

/// Items one scraper took from a [`WorkQueue`], plus the one in progress.
#[derive(Clone, Default, Debug)]
pub struct Claims {
    state: Arc<Mutex<ClaimState>>,
}

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, item: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.claimed.push(item.to_string());
            s.current = Some(item.to_string());
        }
    }

    /// The item whose page is being processed right now.
    pub fn current(&self) -> Option<String> {
        self.state.lock().ok()?.current.clone()
    }

    pub fn claimed(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.claimed.clone())
            .unwrap_or_default()
    }

    /// URLs for every claimed item, in claim order, walked with a private
    /// cursor. Claims are read lazily, so this can be registered before the
    /// claiming group has run.
    pub fn replay_urls<F>(&self, make_url: F) -> UrlSource
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let claims = self.clone();
        let mut cursor = 0usize;
        UrlSource::from_fn(move || {
            let mut s = claims.state.lock().ok()?;
            let item = s.claimed.get(cursor)?.clone();
            cursor += 1;
            s.current = Some(item.clone());
            Some(make_url(&item))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: UrlSource) -> Vec<String> {
        match source {
            UrlSource::Fixed(url) => vec![url],
            UrlSource::Pages(urls) => urls.collect(),
        }
    }

    #[test]
    fn test_claims_split_work_between_scrapers() {
        let queue = WorkQueue::new(["a", "b", "c"]);
        let first = Claims::new();
        let second = Claims::new();

        let mut urls_a = match queue.claim_urls(&first, |c| format!("/eq/{c}")) {
            UrlSource::Pages(it) => it,
            UrlSource::Fixed(_) => unreachable!(),
        };
        let urls_b = queue.claim_urls(&second, |c| format!("/eq/{c}"));

        assert_eq!(urls_a.next().as_deref(), Some("/eq/a"));
        assert_eq!(drain(urls_b), vec!["/eq/b", "/eq/c"]);
        assert_eq!(urls_a.next(), None);

        assert_eq!(first.claimed(), vec!["a"]);
        assert_eq!(second.claimed(), vec!["b", "c"]);
        assert_eq!(second.current().as_deref(), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replay_is_lazy_and_tracks_current() {
        let queue = WorkQueue::new(["x", "y"]);
        let claims = Claims::new();

        // registered before anything was claimed
        let replay = claims.replay_urls(|c| format!("/eq/{c}-balance-sheet"));
        assert_eq!(drain(queue.claim_urls(&claims, |c| c.to_string())).len(), 2);

        let mut replay = match replay {
            UrlSource::Pages(it) => it,
            UrlSource::Fixed(_) => unreachable!(),
        };
        assert_eq!(replay.next().as_deref(), Some("/eq/x-balance-sheet"));
        assert_eq!(claims.current().as_deref(), Some("x"));
        assert_eq!(replay.next().as_deref(), Some("/eq/y-balance-sheet"));
        assert_eq!(replay.next(), None);
    }
}
