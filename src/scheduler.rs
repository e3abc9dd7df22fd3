//! Recurring per-feed polling.
//!
//! Each registered feed gets one task that sleeps for the configured delay,
//! runs a fetch, parse and merge cycle, and sleeps again. The delay is
//! counted from the end of the previous cycle, so a slow fetch pushes back
//! only its own feed. A feed therefore never has two scheduled cycles in
//! flight, and failures are logged and swallowed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fetcher::{FetchError, Transport};
use crate::parser::{self, ParseError};
use crate::store::{FeedId, Store, StoreError};

/// Where a feed's polling task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    #[default]
    Idle,
    Fetching,
    Parsing,
    Merging,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Another poll of the same feed has not finished yet.
    #[error("feed {0} is already being polled")]
    InProgress(FeedId),
}

/// Result of polling one feed during a cycle.
#[derive(Debug)]
pub struct CycleOutcome {
    pub feed_id: FeedId,
    /// Number of posts added, or why the poll failed
    pub result: Result<usize, PollError>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The state a polling task needs, shared by every feed's task.
#[derive(Clone)]
struct Poller {
    store: Store,
    transport: Arc<dyn Transport>,
    phases: Arc<Mutex<HashMap<FeedId, PollPhase>>>,
}

/// Marks a feed as being polled; the feed returns to `Idle` when dropped,
/// including when the poll future is cancelled.
struct InFlight<'a> {
    phases: &'a Mutex<HashMap<FeedId, PollPhase>>,
    feed_id: FeedId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.phases).insert(self.feed_id, PollPhase::Idle);
    }
}

impl Poller {
    fn set_phase(&self, feed_id: FeedId, phase: PollPhase) {
        lock(&self.phases).insert(feed_id, phase);
    }

    /// Claim `feed_id` for one poll, or fail if a poll is already running.
    fn claim(&self, feed_id: FeedId) -> Result<InFlight<'_>, PollError> {
        let mut phases = lock(&self.phases);
        let phase = phases.entry(feed_id).or_default();
        if *phase != PollPhase::Idle {
            return Err(PollError::InProgress(feed_id));
        }
        *phase = PollPhase::Fetching;
        Ok(InFlight {
            phases: &self.phases,
            feed_id,
        })
    }

    async fn poll_feed(&self, feed_id: FeedId) -> Result<usize, PollError> {
        let feed = self
            .store
            .feed(feed_id)
            .ok_or(StoreError::UnknownFeed(feed_id))?;

        let _in_flight = self.claim(feed_id)?;
        self.cycle(feed_id, &feed.url).await
    }

    async fn cycle(&self, feed_id: FeedId, url: &str) -> Result<usize, PollError> {
        let raw = self.transport.fetch(url).await?;

        self.set_phase(feed_id, PollPhase::Parsing);
        let parsed = parser::parse(&raw)?;

        self.set_phase(feed_id, PollPhase::Merging);
        let added = self.store.merge_new_items(feed_id, &parsed.items)?;
        Ok(added.len())
    }

    async fn poll_logged(&self, feed_id: FeedId) -> Result<usize, PollError> {
        let result = self.poll_feed(feed_id).await;
        match &result {
            Ok(0) => debug!(feed_id = %feed_id, "No new posts"),
            Ok(count) => info!(feed_id = %feed_id, count, "Added new posts"),
            Err(PollError::InProgress(_)) => debug!(feed_id = %feed_id, "Poll already running, skipped"),
            Err(e) => warn!(feed_id = %feed_id, error = %e, "Feed poll failed"),
        }
        result
    }
}

pub struct Scheduler {
    poller: Poller,
    delay: Duration,
    tasks: Mutex<HashMap<FeedId, JoinHandle<()>>>,
    refreshing: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(store: Store, transport: Arc<dyn Transport>, delay: Duration) -> Self {
        Self {
            poller: Poller {
                store,
                transport,
                phases: Arc::new(Mutex::new(HashMap::new())),
            },
            delay,
            tasks: Mutex::new(HashMap::new()),
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    /// Begin polling `feed_id` every `delay` after the previous cycle ends.
    ///
    /// Starting a feed that is already scheduled does nothing. Must be called
    /// from within a Tokio runtime.
    pub fn start(&self, feed_id: FeedId) {
        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(&feed_id) {
            return;
        }

        let poller = self.poller.clone();
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                // Errors are already logged; the feed simply waits for its next turn
                let _ = poller.poll_logged(feed_id).await;
            }
        });

        debug!(feed_id = %feed_id, delay_ms = delay.as_millis() as u64, "Scheduled feed polling");
        tasks.insert(feed_id, handle);
    }

    pub fn is_scheduled(&self, feed_id: FeedId) -> bool {
        lock(&self.tasks).contains_key(&feed_id)
    }

    pub fn scheduled_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn phase(&self, feed_id: FeedId) -> PollPhase {
        lock(&self.poller.phases)
            .get(&feed_id)
            .copied()
            .unwrap_or_default()
    }

    /// Poll a single feed once, outside its regular schedule.
    pub async fn poll_feed(&self, feed_id: FeedId) -> Result<usize, PollError> {
        self.poller.poll_logged(feed_id).await
    }

    /// Poll every known feed concurrently and wait until all have settled.
    ///
    /// One feed failing never prevents the others from being merged. Feeds
    /// whose scheduled poll is still running are reported as `InProgress`.
    pub async fn run_cycle(&self) -> Vec<CycleOutcome> {
        let feeds = self.poller.store.feeds();
        debug!(feeds = feeds.len(), "Starting poll cycle");

        let polls = feeds.into_iter().map(|feed| {
            let poller = self.poller.clone();
            async move {
                CycleOutcome {
                    feed_id: feed.id,
                    result: poller.poll_logged(feed.id).await,
                }
            }
        });
        join_all(polls).await
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Run one cycle unless a manual refresh is already in progress.
    pub async fn refresh_all(&self) -> Option<Vec<CycleOutcome>> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return None;
            }
            *refreshing = true;
        }

        let outcomes = self.run_cycle().await;

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        info!(feeds = outcomes.len(), "Manual refresh complete");
        Some(outcomes)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.tasks).drain() {
            handle.abort();
        }
    }
}
