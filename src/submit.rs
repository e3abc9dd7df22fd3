//! Registering a new feed from a user-submitted URL.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::error::{ErrorCode, FeedError, ValidationError};
use crate::fetcher::Transport;
use crate::merge::find_new_items;
use crate::parser;
use crate::scheduler::Scheduler;
use crate::store::{Feed, FormState, FormStatus, NewFeed, Store};

/// Check a submitted URL before any network access.
///
/// The input is trimmed. It must be a non-empty absolute http(s) URL that
/// is not already one of `existing`.
pub fn validate_url(input: &str, existing: &[String]) -> Result<String, FeedError> {
    let url = input.trim();
    if url.is_empty() {
        return Err(ValidationError::Empty.into());
    }

    let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ValidationError::InvalidUrl(format!("unsupported URL: {}", url)).into());
    }

    if existing.iter().any(|known| known == url) {
        return Err(FeedError::DuplicateFeed(url.to_string()));
    }

    Ok(url.to_string())
}

/// Holds the form in `Sending` and puts it back to `Idle` when dropped,
/// so a cancelled submission never leaves the form disabled.
struct SendingForm<'a> {
    store: &'a Store,
    error: Option<ErrorCode>,
}

impl<'a> SendingForm<'a> {
    fn begin(store: &'a Store) -> Self {
        store.set_form(FormState {
            status: FormStatus::Sending,
            error: None,
        });
        Self { store, error: None }
    }
}

impl Drop for SendingForm<'_> {
    fn drop(&mut self) {
        self.store.set_form(FormState {
            status: FormStatus::Idle,
            error: self.error,
        });
    }
}

/// Owns the state store and the polling scheduler, and runs submissions.
pub struct Aggregator {
    store: Store,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
}

impl Aggregator {
    pub fn new(store: Store, transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        let scheduler = Scheduler::new(store.clone(), transport.clone(), poll_interval);
        Self {
            store,
            transport,
            scheduler,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run the submission workflow, reflecting progress in the form state.
    ///
    /// The form is `Sending` while the workflow runs and returns to `Idle`
    /// with the failure's error code, or with no error on success. A
    /// submission dropped before it completes leaves the form `Idle`.
    pub async fn submit(&self, input: &str) -> Result<Feed, FeedError> {
        let mut form = SendingForm::begin(&self.store);
        let result = self.register(input).await;
        form.error = result.as_ref().err().map(FeedError::code);
        result
    }

    /// Validate, fetch, parse, then register the feed with its posts and
    /// start polling it. Stops at the first failure with state unchanged.
    pub async fn register(&self, input: &str) -> Result<Feed, FeedError> {
        let url = validate_url(input, &self.store.feed_urls())?;

        let raw = self.transport.fetch(&url).await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to fetch submitted feed");
            e
        })?;
        let parsed = parser::parse(&raw).map_err(|e| {
            warn!(url = %url, error = %e, "Submitted URL is not a feed");
            e
        })?;

        let initial = find_new_items(&HashSet::new(), &parsed.items);
        let (feed, posts) = self.store.register_feed(
            NewFeed {
                title: parsed.title,
                description: parsed.description,
                url,
            },
            &initial,
        )?;

        self.scheduler.start(feed.id);
        info!(
            feed_id = %feed.id,
            url = %feed.url,
            posts = posts.len(),
            "Registered feed"
        );
        Ok(feed)
    }
}
