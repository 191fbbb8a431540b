use thiserror::Error;

/// Failures surfaced by the scraping core.
///
/// Query misses are never errors: they come back as absent elements or
/// empty lists. Everything here aborts the scraper that raised it.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("unknown converter: {0}")]
    UnknownConverter(String),

    #[error("converter '{tag}' needs argument #{index}")]
    MissingArgument { tag: String, index: usize },

    #[error("cannot convert {value:?} with '{tag}': {reason}")]
    Conversion {
        tag: String,
        value: String,
        reason: String,
    },

    #[error("merge conflict at '{path}': cannot combine {existing} with {incoming}")]
    MergeConflict {
        path: String,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("unsupported browser family: {0}")]
    UnsupportedBrowser(String),

    #[error("backend initialisation failed: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
