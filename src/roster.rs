//! Roster loading.
//!
//! The roster is a JSON document with a `friends` array whose entries are
//! `[name, homepage_url, avatar_url, feed_url]`. Entries are kept as raw
//! JSON so failed ones can be written back out verbatim.

use serde_json::Value;
use tracing::warn;

use crate::client::{FetchClient, RequestProfile};
use crate::error::{FetchError, RosterError};
use crate::feed::status_error;

const UNKNOWN_NAME: &str = "UNKNOWN";

/// One roster entry, read leniently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub homepage_url: String,
    pub avatar_url: String,
    /// Trimmed feed location; `None` when absent, blank or not a string
    pub feed_url: Option<String>,
}

fn string_at(fields: &[Value], index: usize) -> String {
    match fields.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl Source {
    pub fn from_entry(entry: &Value) -> Self {
        let Some(fields) = entry.as_array() else {
            return Self {
                name: UNKNOWN_NAME.to_string(),
                homepage_url: String::new(),
                avatar_url: String::new(),
                feed_url: None,
            };
        };

        let name = if fields.is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            string_at(fields, 0)
        };

        let feed_url = fields
            .get(3)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        Self {
            name,
            homepage_url: string_at(fields, 1),
            avatar_url: string_at(fields, 2),
            feed_url,
        }
    }
}

/// Extracts the `friends` entries. A document without the key has no sources.
pub fn parse_roster(text: &str) -> Result<Vec<Value>, RosterError> {
    let document: Value = serde_json::from_str(text)?;
    match document.get("friends") {
        None => {
            warn!("Roster has no `friends` key, treating it as empty");
            Ok(Vec::new())
        }
        Some(Value::Array(entries)) => Ok(entries.clone()),
        Some(_) => Err(RosterError::NotAnArray),
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Reads the roster from an http(s) URL or a local UTF-8 file.
pub async fn load_roster(location: &str, client: &FetchClient) -> Result<Vec<Value>, RosterError> {
    let text = if is_remote(location) {
        let response = client.get(location, &RequestProfile::default()).await?;
        if response.status().as_u16() >= 400 {
            return Err(status_error(location, response).await.into());
        }
        response.text().await.map_err(|e| FetchError::Network {
            url: location.to_string(),
            source: e,
        })?
    } else {
        tokio::fs::read_to_string(location).await?
    };

    parse_roster(&text)
}
