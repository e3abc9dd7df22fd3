//! In-memory feed and post state with change notification.
//!
//! [`Store`] is a cheap-to-clone handle around the single shared [`State`].
//! Every mutator finishes its write without suspending and publishes one
//! [`StoreEvent`] per changed field on a broadcast channel before releasing
//! the lock, so subscribers observe changes in the order they happened.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use crate::error::ErrorCode;
use crate::merge::find_new_items;
use crate::parser::ParsedItem;

/// Broadcast channel capacity
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FeedId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of identities for feeds and posts.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Monotonic counter starting at 1. Identities are never reused.
#[derive(Debug)]
pub struct SequentialIds(AtomicU64);

impl SequentialIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: FeedId,
    pub title: String,
    pub description: String,
    pub url: String,
}

/// A feed about to be registered; the store assigns its identity.
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub title: String,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: PostId,
    pub feed_id: FeedId,
    pub title: String,
    pub description: String,
    pub link: String,
    pub read: bool,
}

impl Post {
    /// The post's link if it is safe to follow from a page, i.e. an
    /// absolute http(s) URL.
    pub fn web_link(&self) -> Option<&str> {
        let url = Url::parse(&self.link).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(self.link.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    #[default]
    Idle,
    Sending,
}

/// State of the feed submission form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FormState {
    pub status: FormStatus,
    pub error: Option<ErrorCode>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub feeds: Vec<Feed>,
    /// Most recently discovered batch first.
    pub posts: Vec<Post>,
    pub form: FormState,
    pub preview: Option<PostId>,
}

/// A single observable change, tagged with the path of the field it touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "path", content = "value")]
pub enum StoreEvent {
    #[serde(rename = "feeds")]
    FeedAdded(Feed),
    #[serde(rename = "posts")]
    PostsAdded { feed_id: FeedId, posts: Vec<Post> },
    #[serde(rename = "posts.read")]
    PostRead(PostId),
    #[serde(rename = "form")]
    FormChanged(FormState),
    #[serde(rename = "preview")]
    PreviewChanged(Option<PostId>),
}

impl StoreEvent {
    pub fn path(&self) -> &'static str {
        match self {
            StoreEvent::FeedAdded(_) => "feeds",
            StoreEvent::PostsAdded { .. } => "posts",
            StoreEvent::PostRead(_) => "posts.read",
            StoreEvent::FormChanged(_) => "form",
            StoreEvent::PreviewChanged(_) => "preview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("feed already registered: {0}")]
    DuplicateFeed(String),
    #[error("unknown feed {0}")]
    UnknownFeed(FeedId),
}

struct Inner {
    state: RwLock<State>,
    ids: Arc<dyn IdGenerator>,
    events: broadcast::Sender<StoreEvent>,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(SequentialIds::new()))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                ids,
                events,
            }),
        }
    }

    /// Receive every change made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    pub fn add_feed(&self, new_feed: NewFeed) -> Result<Feed, StoreError> {
        let mut state = self.write();
        self.insert_feed(&mut state, new_feed)
    }

    /// Add a feed together with its first batch of posts under one write
    /// lock, so no reader sees the feed without its posts.
    pub fn register_feed(
        &self,
        new_feed: NewFeed,
        items: &[ParsedItem],
    ) -> Result<(Feed, Vec<Post>), StoreError> {
        let mut state = self.write();
        let feed = self.insert_feed(&mut state, new_feed)?;
        let posts = self.insert_batch(&mut state, feed.id, items);
        Ok((feed, posts))
    }

    fn insert_feed(&self, state: &mut State, new_feed: NewFeed) -> Result<Feed, StoreError> {
        if state.feeds.iter().any(|f| f.url == new_feed.url) {
            return Err(StoreError::DuplicateFeed(new_feed.url));
        }

        let feed = Feed {
            id: FeedId(self.inner.ids.next_id()),
            title: new_feed.title,
            description: new_feed.description,
            url: new_feed.url,
        };
        state.feeds.push(feed.clone());
        self.emit(StoreEvent::FeedAdded(feed.clone()));
        Ok(feed)
    }

    /// Prepend `items` as one batch of unread posts owned by `feed_id`.
    ///
    /// The batch keeps its internal order. Callers are expected to have
    /// filtered out links the feed already holds.
    pub fn add_posts(&self, feed_id: FeedId, items: &[ParsedItem]) -> Result<Vec<Post>, StoreError> {
        let mut state = self.write();
        if !state.feeds.iter().any(|f| f.id == feed_id) {
            return Err(StoreError::UnknownFeed(feed_id));
        }
        Ok(self.insert_batch(&mut state, feed_id, items))
    }

    /// Dedupe `items` against the feed's stored links and prepend the new
    /// ones, all under a single write lock.
    pub fn merge_new_items(
        &self,
        feed_id: FeedId,
        items: &[ParsedItem],
    ) -> Result<Vec<Post>, StoreError> {
        let mut state = self.write();
        if !state.feeds.iter().any(|f| f.id == feed_id) {
            return Err(StoreError::UnknownFeed(feed_id));
        }
        let existing = links_in(&state, feed_id);
        let fresh = find_new_items(&existing, items);
        Ok(self.insert_batch(&mut state, feed_id, &fresh))
    }

    fn insert_batch(&self, state: &mut State, feed_id: FeedId, items: &[ParsedItem]) -> Vec<Post> {
        if items.is_empty() {
            return Vec::new();
        }

        let batch: Vec<Post> = items
            .iter()
            .map(|item| Post {
                id: PostId(self.inner.ids.next_id()),
                feed_id,
                title: item.title.clone(),
                description: item.description.clone(),
                link: item.link.clone(),
                read: false,
            })
            .collect();

        state.posts.splice(0..0, batch.iter().cloned());
        self.emit(StoreEvent::PostsAdded {
            feed_id,
            posts: batch.clone(),
        });
        batch
    }

    /// Returns whether the post exists. Unknown ids are ignored.
    pub fn mark_read(&self, post_id: PostId) -> bool {
        let mut state = self.write();
        self.mark_read_locked(&mut state, post_id).is_some()
    }

    fn mark_read_locked(&self, state: &mut State, post_id: PostId) -> Option<Post> {
        let post = state.posts.iter_mut().find(|p| p.id == post_id)?;
        if !post.read {
            post.read = true;
            self.emit(StoreEvent::PostRead(post_id));
        }
        Some(post.clone())
    }

    /// Open a post for preview, marking it read.
    pub fn preview_post(&self, post_id: PostId) -> Option<Post> {
        let mut state = self.write();
        let post = self.mark_read_locked(&mut state, post_id)?;
        state.preview = Some(post_id);
        self.emit(StoreEvent::PreviewChanged(Some(post_id)));
        Some(post)
    }

    pub fn close_preview(&self) {
        let mut state = self.write();
        if state.preview.take().is_some() {
            self.emit(StoreEvent::PreviewChanged(None));
        }
    }

    pub fn set_form(&self, form: FormState) {
        let mut state = self.write();
        state.form = form.clone();
        self.emit(StoreEvent::FormChanged(form));
    }

    pub fn snapshot(&self) -> State {
        self.read().clone()
    }

    pub fn form(&self) -> FormState {
        self.read().form.clone()
    }

    pub fn feeds(&self) -> Vec<Feed> {
        self.read().feeds.clone()
    }

    pub fn feed(&self, feed_id: FeedId) -> Option<Feed> {
        self.read().feeds.iter().find(|f| f.id == feed_id).cloned()
    }

    pub fn feed_urls(&self) -> Vec<String> {
        self.read().feeds.iter().map(|f| f.url.clone()).collect()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.read().posts.clone()
    }

    pub fn post(&self, post_id: PostId) -> Option<Post> {
        self.read().posts.iter().find(|p| p.id == post_id).cloned()
    }

    pub fn posts_for_feed(&self, feed_id: FeedId) -> Vec<Post> {
        self.read()
            .posts
            .iter()
            .filter(|p| p.feed_id == feed_id)
            .cloned()
            .collect()
    }

    pub fn links_for_feed(&self, feed_id: FeedId) -> HashSet<String> {
        links_in(&self.read(), feed_id)
    }
}

fn links_in(state: &State, feed_id: FeedId) -> HashSet<String> {
    state
        .posts
        .iter()
        .filter(|p| p.feed_id == feed_id)
        .map(|p| p.link.clone())
        .collect()
}
