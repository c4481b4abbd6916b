//! Merging per-source outcomes into run statistics and the ranked list.

use std::cmp::Reverse;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::timestamp::{self, SENTINEL};
use crate::worker::{SourceOutcome, SourceStatus};

/// An article in its published shape. `author` and `avatar` come from the
/// roster entry, not from the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub title: String,
    pub created: String,
    pub link: String,
    pub author: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub friends_num: usize,
    pub active_num: usize,
    pub error_num: usize,
    pub article_num: usize,
    #[serde(rename = "last_updated_time")]
    pub generated_at: String,
}

impl Statistics {
    pub fn zeroed() -> Self {
        Self {
            friends_num: 0,
            active_num: 0,
            error_num: 0,
            article_num: 0,
            generated_at: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub statistics: Statistics,
    pub article_data: Vec<NormalizedArticle>,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self {
            statistics: Statistics::zeroed(),
            article_data: Vec::new(),
        }
    }
}

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Folds outcomes (in the order they arrived) into statistics, a flat
/// article list and the raw entries of failed sources.
///
/// `friends_num` is the roster size, malformed entries included.
pub fn aggregate(
    friends_num: usize,
    outcomes: Vec<SourceOutcome>,
) -> (AggregateResult, Vec<Value>) {
    let mut active_num = 0;
    let mut error_num = 0;
    let mut article_data = Vec::new();
    let mut errors = Vec::new();

    for outcome in outcomes {
        match outcome.result.status {
            SourceStatus::Active => {
                active_num += 1;
                article_data.extend(outcome.result.articles);
            }
            SourceStatus::Error => {
                error_num += 1;
                errors.push(outcome.entry);
            }
        }
    }

    let result = AggregateResult {
        statistics: Statistics {
            friends_num,
            active_num,
            error_num,
            article_num: article_data.len(),
            generated_at: now(),
        },
        article_data,
    };

    (result, errors)
}

fn sort_key(created: &str) -> NaiveDateTime {
    timestamp::parse_created(created)
        .or_else(|| timestamp::parse_created(SENTINEL))
        .unwrap_or_default()
}

/// Gives undated articles the sentinel time, then orders newest first.
///
/// The sort is stable: articles with equal times keep their input order.
pub fn sort_articles(articles: &mut [NormalizedArticle]) {
    for article in articles.iter_mut() {
        if article.created.trim().is_empty() {
            warn!(
                "Article '{}' has no valid time, using {}",
                article.title, SENTINEL
            );
            article.created = SENTINEL.to_string();
        }
    }

    articles.sort_by_key(|a| Reverse(sort_key(&a.created)));
}
