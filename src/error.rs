//! Error types for feed ingestion.

use serde::Serialize;
use thiserror::Error;

use crate::fetcher::FetchError;
use crate::parser::ParseError;
use crate::store::{FeedId, StoreError};

/// Why a submitted URL was rejected before any network access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL must not be empty")]
    Empty,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Terminal failure of a feed submission.
///
/// Only the first failing step is reported; the state store is left
/// untouched when any of these is returned.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Input was empty or not an http(s) URL.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A feed with this source URL is already registered.
    #[error("feed already registered: {0}")]
    DuplicateFeed(String),

    /// The transport could not retrieve the document.
    #[error("network error: {0}")]
    Network(#[from] FetchError),

    /// The document is not a channel-based RSS feed.
    #[error("not a valid feed: {0}")]
    Parse(#[from] ParseError),

    /// The feed vanished between registration steps.
    #[error("unknown feed {0}")]
    UnknownFeed(FeedId),
}

impl From<StoreError> for FeedError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateFeed(url) => FeedError::DuplicateFeed(url),
            StoreError::UnknownFeed(id) => FeedError::UnknownFeed(id),
        }
    }
}

impl FeedError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FeedError::Validation(ValidationError::Empty) => ErrorCode::Empty,
            FeedError::Validation(ValidationError::InvalidUrl(_)) => ErrorCode::InvalidUrl,
            FeedError::DuplicateFeed(_) => ErrorCode::AlreadyExists,
            FeedError::Network(_) => ErrorCode::NetworkError,
            FeedError::Parse(_) => ErrorCode::NoRss,
            FeedError::UnknownFeed(_) => ErrorCode::Default,
        }
    }
}

/// Stable key the presentation layer translates into a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "invalidUrl")]
    InvalidUrl,
    #[serde(rename = "alreadyExists")]
    AlreadyExists,
    #[serde(rename = "networkError")]
    NetworkError,
    #[serde(rename = "noRSS")]
    NoRss,
    #[serde(rename = "default")]
    Default,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Empty => "empty",
            ErrorCode::InvalidUrl => "invalidUrl",
            ErrorCode::AlreadyExists => "alreadyExists",
            ErrorCode::NetworkError => "networkError",
            ErrorCode::NoRss => "noRSS",
            ErrorCode::Default => "default",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
