//! FeedPulse - An RSS Feed Aggregator
//!
//! This crate ingests user-submitted RSS feeds into a single post stream and
//! keeps it current by re-polling every feed, never storing the same link
//! twice for a feed.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod parser;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod submit;
