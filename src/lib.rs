//! Friend Circle - a feed aggregator for "friends' recent posts" pages
//!
//! This crate reads a roster of independently hosted blogs, fetches each
//! blog's Atom/RSS feed concurrently, and produces one ranked article list
//! plus run statistics.

pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod output;
pub mod roster;
pub mod timestamp;
pub mod worker;
