//! Run coordinator: roster in, ranked articles and error roster out.

use std::future::Future;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{error, info};

use crate::aggregate::{aggregate, sort_articles, AggregateResult};
use crate::client::{AddressFamily, FetchClient, TwoAttemptPolicy};
use crate::config::SpiderSettings;
use crate::error::FetchError;
use crate::roster::{load_roster, Source};
use crate::worker::{process_source, SourceOutcome, SourceResult};

/// Everything a run hands to the output sink.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub result: AggregateResult,
    /// Raw roster entries of the sources classified as `error`
    pub errors: Vec<Value>,
}

impl RunOutput {
    pub fn empty() -> Self {
        Self {
            result: AggregateResult::empty(),
            errors: Vec::new(),
        }
    }
}

/// Number of workers allowed to run at once for a roster of `roster_size`.
pub fn parallelism(max_workers: usize, roster_size: usize) -> usize {
    let size = if roster_size == 0 { 1 } else { roster_size };
    max_workers.min(size).max(1)
}

/// Dispatches one worker per roster entry and waits for all of them.
pub struct Fetcher {
    client: FetchClient,
    count: usize,
    max_workers: usize,
    policy: TwoAttemptPolicy,
}

impl Fetcher {
    pub fn new(client: FetchClient, count: usize, max_workers: usize) -> Self {
        Self {
            client,
            count,
            max_workers,
            policy: TwoAttemptPolicy::feed(),
        }
    }

    pub fn from_settings(settings: &SpiderSettings) -> Result<Self, FetchError> {
        let family = if settings.force_ipv4 {
            AddressFamily::PreferIpv4
        } else {
            AddressFamily::Any
        };
        let client = FetchClient::new(family)?;
        Ok(Self::new(client, settings.article_count, settings.max_workers))
    }

    pub fn with_policy(mut self, policy: TwoAttemptPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    /// Runs every entry to completion and returns the outcomes in the order
    /// workers finished.
    ///
    /// A worker that panics is recorded as an `error` for its source.
    pub async fn collect(&self, roster: Vec<Value>) -> Vec<SourceOutcome> {
        let count = self.count;
        self.dispatch(roster, |source| {
            let client = self.client.clone();
            let policy = self.policy.clone();
            async move { process_source(&source, &client, count, &policy).await }
        })
        .await
    }

    /// Spawns `worker` once per entry, with at most `parallelism` in flight.
    async fn dispatch<W, Fut>(&self, roster: Vec<Value>, worker: W) -> Vec<SourceOutcome>
    where
        W: Fn(Source) -> Fut,
        Fut: Future<Output = SourceResult> + Send + 'static,
    {
        if roster.is_empty() {
            return Vec::new();
        }

        let workers = parallelism(self.max_workers, roster.len());
        info!("Processing {} sources with {} workers", roster.len(), workers);

        stream::iter(roster)
            .map(|entry| {
                let source = Source::from_entry(&entry);
                let name = source.name.clone();
                let handle = tokio::spawn(worker(source));

                async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            error!("Worker for {} ({}) failed: {}", name, entry, e);
                            SourceResult::error(name)
                        }
                    };
                    SourceOutcome { entry, result }
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await
    }

    /// Loads the roster at `location`, processes it and ranks the articles.
    ///
    /// An unreadable roster produces zeroed statistics and empty lists.
    pub async fn run(&self, location: &str) -> RunOutput {
        let roster = match load_roster(location, &self.client).await {
            Ok(roster) => roster,
            Err(e) => {
                error!("Unable to load roster {}: {}", location, e);
                return RunOutput::empty();
            }
        };

        let friends_num = roster.len();
        let outcomes = self.collect(roster).await;
        let (mut result, errors) = aggregate(friends_num, outcomes);
        sort_articles(&mut result.article_data);

        let stats = &result.statistics;
        info!(
            "Processed {} sources: {} reachable, {} unreachable, {} articles",
            stats.friends_num, stats.active_num, stats.error_num, stats.article_num
        );

        RunOutput { result, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::worker::SourceStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(titles: &[&str]) -> String {
        let items: String = titles
            .iter()
            .map(|t| {
                format!(
                    "<item><title>{t}</title><link>https://example.com/{t}</link>\
                     <pubDate>Mon, 02 Jan 2023 03:04:05 GMT</pubDate></item>"
                )
            })
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>{items}</channel></rss>"#)
    }

    fn test_fetcher(max_workers: usize) -> Fetcher {
        let client = FetchClient::new(AddressFamily::Any)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                backoff_factor: Duration::ZERO,
                ..Default::default()
            });
        Fetcher::new(client, 5, max_workers).with_policy(TwoAttemptPolicy {
            delay: Duration::ZERO,
            ..TwoAttemptPolicy::feed()
        })
    }

    mod parallelism_tests {
        use super::*;

        #[test]
        fn test_bounded_by_roster_size() {
            assert_eq!(parallelism(10, 3), 3);
        }

        #[test]
        fn test_bounded_by_max_workers() {
            assert_eq!(parallelism(4, 30), 4);
        }

        #[test]
        fn test_never_below_one() {
            assert_eq!(parallelism(0, 5), 1);
            assert_eq!(parallelism(10, 0), 1);
        }
    }

    mod collect_tests {
        use super::*;

        #[tokio::test]
        async fn test_empty_roster_dispatches_nothing() {
            let outcomes = test_fetcher(10).collect(Vec::new()).await;
            assert!(outcomes.is_empty());
        }

        #[tokio::test]
        async fn test_failures_do_not_stop_other_workers() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/ok"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["a", "b"])))
                .mount(&mock_server)
                .await;
            Mock::given(method("GET"))
                .and(path("/gone"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&mock_server)
                .await;

            let roster = vec![
                json!(["Gone", "", "", format!("{}/gone", mock_server.uri())]),
                json!(["NoFeed", "", ""]),
                json!(["Ok", "", "", format!("{}/ok", mock_server.uri())]),
            ];

            let outcomes = test_fetcher(1).collect(roster).await;
            assert_eq!(outcomes.len(), 3);

            let ok = outcomes.iter().find(|o| o.result.name == "Ok").unwrap();
            assert_eq!(ok.result.status, SourceStatus::Active);
            assert_eq!(ok.result.articles.len(), 2);

            let failed: Vec<_> = outcomes
                .iter()
                .filter(|o| o.result.status == SourceStatus::Error)
                .map(|o| o.result.name.as_str())
                .collect();
            assert_eq!(failed.len(), 2);
            assert!(failed.contains(&"Gone"));
            assert!(failed.contains(&"NoFeed"));
        }

        #[tokio::test]
        async fn test_panicking_worker_is_error_for_its_source() {
            let roster = vec![
                json!(["Calm", "", "", "https://calm.example/feed"]),
                json!(["Boom", "", "", "https://boom.example/feed"]),
            ];

            let outcomes = test_fetcher(2)
                .dispatch(roster, |source| async move {
                    if source.name == "Boom" {
                        panic!("worker fault");
                    }
                    SourceResult {
                        name: source.name,
                        status: SourceStatus::Active,
                        articles: Vec::new(),
                    }
                })
                .await;

            assert_eq!(outcomes.len(), 2);
            let boom = outcomes.iter().find(|o| o.result.name == "Boom").unwrap();
            assert_eq!(boom.result, SourceResult::error("Boom"));
            assert_eq!(boom.entry, json!(["Boom", "", "", "https://boom.example/feed"]));

            let calm = outcomes.iter().find(|o| o.result.name == "Calm").unwrap();
            assert_eq!(calm.result.status, SourceStatus::Active);
        }

        #[tokio::test]
        async fn test_in_flight_workers_stay_within_parallelism() {
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let roster: Vec<Value> = (0..8)
                .map(|i| json!([format!("s{}", i), "", "", "https://s.example/feed"]))
                .collect();

            let outcomes = test_fetcher(2)
                .dispatch(roster, |source| {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        SourceResult {
                            name: source.name,
                            status: SourceStatus::Active,
                            articles: Vec::new(),
                        }
                    }
                })
                .await;

            assert_eq!(outcomes.len(), 8);
            let peak = peak.load(Ordering::SeqCst);
            assert!((1..=2).contains(&peak), "peak concurrency was {}", peak);
        }

        #[tokio::test]
        async fn test_slow_feeds_are_fetched_at_most_two_at_a_time() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/slow"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(rss(&["a"]))
                        .set_delay(Duration::from_millis(150)),
                )
                .expect(4)
                .mount(&mock_server)
                .await;

            let roster: Vec<Value> = (0..4)
                .map(|i| json!([format!("s{}", i), "", "", format!("{}/slow", mock_server.uri())]))
                .collect();

            let started = Instant::now();
            let outcomes = test_fetcher(2).collect(roster).await;

            assert_eq!(outcomes.len(), 4);
            assert!(outcomes.iter().all(|o| o.result.status == SourceStatus::Active));
            // Four delayed responses through two slots need two full rounds.
            assert!(started.elapsed() >= Duration::from_millis(300));
        }

        #[tokio::test]
        async fn test_outcome_keeps_raw_entry() {
            let entry = json!({"not": "a list"});
            let outcomes = test_fetcher(2).collect(vec![entry.clone()]).await;
            assert_eq!(outcomes.len(), 1);
            assert_eq!(outcomes[0].entry, entry);
            assert_eq!(outcomes[0].result, SourceResult::error("UNKNOWN"));
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn test_unreachable_roster_gives_zeroed_output() {
            let output = test_fetcher(4).run("/nonexistent/friend.json").await;

            let stats = &output.result.statistics;
            assert_eq!(
                (stats.friends_num, stats.active_num, stats.error_num, stats.article_num),
                (0, 0, 0, 0)
            );
            assert!(!stats.generated_at.is_empty());
            assert!(output.result.article_data.is_empty());
            assert!(output.errors.is_empty());
        }

        #[tokio::test]
        async fn test_remote_roster_run() {
            let mock_server = MockServer::start().await;
            let feed_url = format!("{}/feed", mock_server.uri());
            Mock::given(method("GET"))
                .and(path("/friend.json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "friends": [["Alice", "", "https://a.example/avatar.png", feed_url]]
                })))
                .mount(&mock_server)
                .await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["x", "y", "z"])))
                .mount(&mock_server)
                .await;

            let output = test_fetcher(10)
                .run(&format!("{}/friend.json", mock_server.uri()))
                .await;

            assert_eq!(output.result.statistics.active_num, 1);
            assert_eq!(output.result.statistics.article_num, 3);
            assert!(output
                .result
                .article_data
                .iter()
                .all(|a| a.author == "Alice" && a.avatar == "https://a.example/avatar.png"));
        }

        #[tokio::test]
        async fn test_from_settings() {
            let settings = SpiderSettings {
                enable: true,
                json_url: "friend.json".to_string(),
                article_count: 3,
                max_workers: 2,
                force_ipv4: true,
            };
            let fetcher = Fetcher::from_settings(&settings).unwrap();
            assert_eq!(fetcher.client().address_family(), AddressFamily::PreferIpv4);
            assert_eq!(fetcher.count, 3);
            assert_eq!(fetcher.max_workers, 2);
        }
    }
}
