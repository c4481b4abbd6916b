//! Processing of a single roster entry.

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::aggregate::NormalizedArticle;
use crate::client::{FetchClient, TwoAttemptPolicy};
use crate::error::FetchError;
use crate::feed::fetch_feed;
use crate::roster::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Error,
}

/// Terminal classification of one source for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult {
    pub name: String,
    pub status: SourceStatus,
    pub articles: Vec<NormalizedArticle>,
}

impl SourceResult {
    pub fn error(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: SourceStatus::Error,
            articles: Vec::new(),
        }
    }
}

/// A worker's result paired with the raw roster entry it came from.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub entry: Value,
    pub result: SourceResult,
}

/// Fetches one source's feed and binds its articles to the source identity.
///
/// Every failure is returned as an `error` result; an entry without a feed
/// location is rejected before any request is made.
pub async fn process_source(
    source: &Source,
    client: &FetchClient,
    count: usize,
    policy: &TwoAttemptPolicy,
) -> SourceResult {
    let Some(feed_url) = source.feed_url.as_deref() else {
        let err = FetchError::MissingFeedUrl {
            name: source.name.clone(),
        };
        error!("{}", err);
        return SourceResult::error(&source.name);
    };

    info!("{} uses feed {}", source.name, feed_url);

    match fetch_feed(client, feed_url, count, policy).await {
        Ok(feed) => {
            let articles: Vec<NormalizedArticle> = feed
                .articles
                .into_iter()
                .map(|article| NormalizedArticle {
                    title: article.title,
                    created: article.published,
                    link: article.link,
                    author: source.name.clone(),
                    avatar: source.avatar_url.clone(),
                })
                .collect();

            for article in &articles {
                info!(
                    "{} published '{}' @ {}",
                    source.name, article.title, article.created
                );
            }

            SourceResult {
                name: source.name.clone(),
                status: SourceStatus::Active,
                articles,
            }
        }
        Err(e) => {
            error!("Feed fetch for {} failed ({}): {}", source.name, feed_url, e);
            SourceResult::error(&source.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AddressFamily, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{any, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Someone Else's Title</title>
    <id>urn:feed</id>
    <updated>2023-01-02T03:04:05Z</updated>
    <author><name>Feed Internal Author</name></author>
    <entry>
        <title>Hello</title>
        <id>urn:1</id>
        <link href="https://alice.example.com/hello"/>
        <author><name>Feed Internal Author</name></author>
        <published>2023-01-02T03:04:05Z</published>
        <updated>2023-01-02T03:04:05Z</updated>
    </entry>
</feed>"#;

    fn test_client() -> FetchClient {
        FetchClient::new(AddressFamily::Any)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                backoff_factor: Duration::ZERO,
                ..Default::default()
            })
    }

    fn fast_policy() -> TwoAttemptPolicy {
        TwoAttemptPolicy {
            delay: Duration::ZERO,
            ..TwoAttemptPolicy::feed()
        }
    }

    #[tokio::test]
    async fn test_blank_feed_url_makes_no_request() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let source = Source::from_entry(&json!(["Bob", mock_server.uri(), "", "  "]));
        let result = process_source(&source, &test_client(), 5, &fast_policy()).await;

        assert_eq!(result, SourceResult::error("Bob"));
    }

    #[tokio::test]
    async fn test_binds_source_identity() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ATOM))
            .mount(&mock_server)
            .await;

        let source = Source::from_entry(&json!([
            "Alice",
            "https://alice.example.com",
            "https://alice.example.com/avatar.png",
            format!("{}/atom.xml", mock_server.uri())
        ]));
        let result = process_source(&source, &test_client(), 5, &fast_policy()).await;

        assert_eq!(result.status, SourceStatus::Active);
        assert_eq!(result.name, "Alice");
        assert_eq!(
            result.articles,
            vec![NormalizedArticle {
                title: "Hello".to_string(),
                created: "2023-01-02 11:04".to_string(),
                link: "https://alice.example.com/hello".to_string(),
                author: "Alice".to_string(),
                avatar: "https://alice.example.com/avatar.png".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_500_is_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&mock_server)
            .await;

        let source = Source::from_entry(&json!([
            "Carol",
            "",
            "",
            format!("{}/feed", mock_server.uri())
        ]));
        let result = process_source(&source, &test_client(), 5, &fast_policy()).await;

        assert_eq!(result, SourceResult::error("Carol"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SourceStatus::Active).unwrap(), "\"active\"");
        assert_eq!(serde_json::to_string(&SourceStatus::Error).unwrap(), "\"error\"");
    }
}
