//! Fetching one feed document and turning it into article records.

use feed_rs::model::{Entry, Feed, Link, Person, Text};
use feed_rs::parser;
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use tracing::{error, warn};

use crate::client::{FetchClient, RequestProfile, TwoAttemptPolicy};
use crate::error::FetchError;
use crate::timestamp;

/// Characters of response body kept for diagnostics.
const SNIPPET_CHARS: usize = 180;

const RAW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One fetched response body with the metadata needed for diagnostics.
#[derive(Debug, Clone)]
pub struct RawFeedDocument {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RawFeedDocument {
    fn parse_error(&self, url: &str, err: parser::ParseFeedError) -> FetchError {
        FetchError::Parse {
            url: url.to_string(),
            status: self.status,
            content_type: self.content_type.clone(),
            message: err.to_string(),
            snippet: snippet(&self.body),
        }
    }
}

/// One feed entry. Missing text fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawArticle {
    pub title: String,
    pub author: String,
    pub link: String,
    pub summary: String,
    pub content: String,
    /// Wall-clock time the entry was written with, before the shift
    pub published_raw: String,
    /// `YYYY-MM-DD HH:MM`, or empty when no time could be determined
    pub published: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedInfo {
    pub website_name: String,
    pub author: String,
    pub link: String,
    pub articles: Vec<RawArticle>,
}

/// Single-line prefix of a response body.
pub fn snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(SNIPPET_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Consumes a `>= 400` response into an error carrying a body snippet.
pub(crate) async fn status_error(url: &str, response: Response) -> FetchError {
    let status = response.status();
    let content_type = content_type(&response);
    let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
    FetchError::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("").to_string(),
        content_type,
        snippet: snippet(&body),
    }
}

async fn fetch_document(
    client: &FetchClient,
    url: &str,
    profile: &RequestProfile,
) -> Result<RawFeedDocument, FetchError> {
    let response = client.get(url, profile).await?;
    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(status_error(url, response).await);
    }
    let content_type = content_type(&response);

    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network {
            url: url.to_string(),
            source: e,
        })?
        .to_vec();

    Ok(RawFeedDocument {
        status: status.as_u16(),
        content_type,
        body,
    })
}

/// Fetches `url` and extracts at most `count` articles in document order.
///
/// A document that fails to parse is requested once more with the
/// policy's fallback profile. Failures are logged here with a body snippet
/// and returned to the caller as data.
pub async fn fetch_feed(
    client: &FetchClient,
    url: &str,
    count: usize,
    policy: &TwoAttemptPolicy,
) -> Result<FeedInfo, FetchError> {
    let result = fetch_and_parse(client, url, count, policy).await;
    if let Err(e) = &result {
        error!("Unreachable feed {}: {}; snippet: {}", url, e, e.snippet());
    }
    result
}

async fn fetch_and_parse(
    client: &FetchClient,
    url: &str,
    count: usize,
    policy: &TwoAttemptPolicy,
) -> Result<FeedInfo, FetchError> {
    let [primary, fallback] = policy.attempts();

    let document = fetch_document(client, url, primary).await?;
    let first = parse_document(&document.body).map_err(|e| e.to_string());
    let feed = match first {
        Ok(feed) => feed,
        Err(reason) => {
            warn!(
                "Initial parse of {} failed ({}), retrying; status={}; content-type={}",
                url, reason, document.status, document.content_type
            );
            tokio::time::sleep(policy.delay).await;

            let document = fetch_document(client, url, fallback).await?;
            parse_document(&document.body).map_err(|e| document.parse_error(url, e))?
        }
    };

    Ok(FeedInfo::from_feed(feed, count))
}

/// feed-rs parser whose timestamps carry the wall-clock time the feed wrote.
///
/// Offsets are dropped rather than converted, so the returned `Utc` value
/// is a wall-clock time and not a real instant.
fn feed_parser() -> parser::Parser {
    parser::Builder::new()
        .timestamp_parser(|raw| timestamp::parse_wall_clock(raw).map(|dt| dt.and_utc()))
        .build()
}

/// Parses a feed document with the wall-clock timestamp rules.
pub fn parse_document(body: &[u8]) -> Result<Feed, parser::ParseFeedError> {
    feed_parser().parse(body)
}

fn text(value: Option<Text>) -> String {
    value.map(|t| t.content).unwrap_or_default()
}

fn first_author(authors: &[Person]) -> String {
    authors.first().map(|p| p.name.clone()).unwrap_or_default()
}

/// The `alternate` link (or one without `rel`), else the first link.
fn main_link(links: &[Link]) -> String {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default()
}

impl FeedInfo {
    pub fn from_feed(feed: Feed, count: usize) -> Self {
        let articles = feed
            .entries
            .into_iter()
            .take(count)
            .map(RawArticle::from_entry)
            .collect();

        Self {
            website_name: text(feed.title),
            author: first_author(&feed.authors),
            link: main_link(&feed.links),
            articles,
        }
    }
}

impl RawArticle {
    pub fn from_entry(entry: Entry) -> Self {
        let title = text(entry.title);

        let wall_clock = if let Some(published) = entry.published {
            Some(published.naive_utc())
        } else if let Some(updated) = entry.updated {
            let updated = updated.naive_utc();
            warn!(
                "Article '{}' has no publish time, using update time {}",
                title,
                timestamp::to_created(updated)
            );
            Some(updated)
        } else {
            warn!("Article '{}' carries no time information", title);
            None
        };

        let summary = text(entry.summary);
        let content = entry
            .content
            .and_then(|c| c.body)
            .unwrap_or_else(|| summary.clone());

        Self {
            author: first_author(&entry.authors),
            link: main_link(&entry.links),
            published_raw: wall_clock
                .map(|dt| dt.format(RAW_FORMAT).to_string())
                .unwrap_or_default(),
            published: wall_clock.map(timestamp::to_created).unwrap_or_default(),
            summary,
            content,
            title,
        }
    }
}
