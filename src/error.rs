//! Error types for the aggregation pipeline.

use thiserror::Error;

/// Failures while fetching or parsing a single feed.
///
/// None of these abort a run: the worker turns them into an `error`
/// classification for the affected source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The roster entry has no usable feed location. No request is made.
    #[error("{name} has no feed_url (4th roster field)")]
    MissingFeedUrl { name: String },

    /// Connection, timeout or name resolution failure after retries.
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Status >= 400 once retries are exhausted.
    #[error("{status} {reason} from {url}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
        content_type: String,
        snippet: String,
    },

    /// The document could not be read as a feed, even with the fallback request.
    #[error("feed parse failed for {url}: {message}; status={status}; content-type={content_type}")]
    Parse {
        url: String,
        status: u16,
        content_type: String,
        message: String,
        snippet: String,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// Leading slice of the response body, when one was received.
    pub fn snippet(&self) -> &str {
        match self {
            FetchError::HttpStatus { snippet, .. } | FetchError::Parse { snippet, .. } => snippet,
            _ => "",
        }
    }
}

/// The roster itself could not be obtained. This is the only failure that
/// ends a run early.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to fetch roster: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to read roster file: {0}")]
    Io(#[from] std::io::Error),

    #[error("roster is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("roster `friends` must be an array")]
    NotAnArray,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
