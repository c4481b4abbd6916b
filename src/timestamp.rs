//! Publish-time normalization.
//!
//! Feeds disagree on date formats. Everything that parses is shifted by a
//! flat eight hours on its written wall-clock time and rendered as
//! `YYYY-MM-DD HH:MM`; anything else becomes an empty string.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

/// Output format of [`normalize`] and the sort key format.
pub const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Placeholder for articles without a usable publish time.
pub const SENTINEL: &str = "2024-01-01 00:00";

const SHIFT_HOURS: i64 = 8;

enum Pattern {
    /// Carries a zone; the written wall-clock time is kept.
    Zoned(&'static str),
    Naive(&'static str),
    Date(&'static str),
}

/// Formats tried by the flexible first pass, after RFC 3339 and RFC 2822.
const FLEXIBLE: &[Pattern] = &[
    Pattern::Zoned("%Y-%m-%dT%H:%M:%S%.f%:z"),
    Pattern::Zoned("%Y-%m-%d %H:%M:%S%.f%:z"),
    Pattern::Zoned("%Y-%m-%d %H:%M:%S %z"),
    Pattern::Naive("%Y-%m-%dT%H:%M:%S%.f"),
    Pattern::Naive("%Y-%m-%d %H:%M:%S%.f"),
    Pattern::Naive("%Y-%m-%dT%H:%M"),
    Pattern::Naive("%Y-%m-%d %H:%M"),
    Pattern::Naive("%Y/%m/%d %H:%M:%S"),
    Pattern::Naive("%Y/%m/%d %H:%M"),
    Pattern::Naive("%d %b %Y %H:%M:%S"),
    Pattern::Naive("%a, %d %b %Y %H:%M:%S UTC"),
    Pattern::Date("%Y/%m/%d"),
    Pattern::Date("%B %d, %Y"),
    Pattern::Date("%b %d, %Y"),
];

/// Explicit patterns, first match wins.
const EXPLICIT: &[Pattern] = &[
    Pattern::Zoned("%a, %d %b %Y %H:%M:%S %z"),
    Pattern::Naive("%a, %d %b %Y %H:%M:%S GMT"),
    Pattern::Zoned("%Y-%m-%dT%H:%M:%S%z"),
    Pattern::Naive("%Y-%m-%dT%H:%M:%SZ"),
    Pattern::Naive("%Y-%m-%d %H:%M:%S"),
    Pattern::Date("%Y-%m-%d"),
];

impl Pattern {
    fn parse(&self, input: &str) -> Option<NaiveDateTime> {
        match self {
            Pattern::Zoned(fmt) => DateTime::parse_from_str(input, fmt)
                .ok()
                .map(|dt| dt.naive_local()),
            Pattern::Naive(fmt) => NaiveDateTime::parse_from_str(input, fmt).ok(),
            Pattern::Date(fmt) => NaiveDate::parse_from_str(input, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        }
    }
}

fn parse_flexible(input: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt.naive_local());
    }
    FLEXIBLE.iter().find_map(|p| p.parse(input))
}

fn parse_explicit(input: &str) -> Option<NaiveDateTime> {
    EXPLICIT.iter().find_map(|p| p.parse(input))
}

/// Reads a raw feed timestamp as the wall-clock time it was written in.
///
/// Any zone or offset is dropped, not converted.
pub fn parse_wall_clock(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_flexible(trimmed).or_else(|| parse_explicit(trimmed))
}

/// Applies the flat shift to a wall-clock time and renders it as `created`.
pub fn to_created(wall_clock: NaiveDateTime) -> String {
    wall_clock
        .checked_add_signed(Duration::hours(SHIFT_HOURS))
        .map(|dt| dt.format(CREATED_FORMAT).to_string())
        .unwrap_or_default()
}

/// Normalizes a raw feed timestamp to `YYYY-MM-DD HH:MM` (+8h), or `""`.
pub fn normalize(raw: &str) -> String {
    parse_wall_clock(raw).map(to_created).unwrap_or_default()
}

/// Parses a normalized `created` value for sorting.
pub fn parse_created(created: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(created, CREATED_FORMAT).ok()
}

/// Whether `created` is a well-formed normalized timestamp.
pub fn is_normalized(created: &str) -> bool {
    created.len() == 16 && parse_created(created).is_some()
}
