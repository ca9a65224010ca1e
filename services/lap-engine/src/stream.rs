//! Live collection subscriptions
//!
//! `StreamHub` turns store feeds into versioned, latest-wins snapshot
//! streams. One background task runs per distinct `(path, query)`; every
//! `Subscription` handle for that key shares it, and the task is aborted
//! when the last handle goes away.
//!
//! Transport failures are published as `LoadState::Failed` and followed by
//! a resubscribe after an exponential backoff.
//!
//! The store's own diff only covers the step from its previous delivery.
//! Each handle may skip coalesced snapshots, and a resubscribe starts the
//! store over, so every handle recomputes `changes` against the documents
//! it last handed out.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{DocumentIndex, RawSnapshot, Snapshot, VersionedSnapshot};
use crate::load_state::LoadState;
use crate::metrics::EngineMetrics;
use crate::store::{CollectionQuery, DocumentStore, StoreError};

/// A live query failed; carries the store's cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("subscription to {path} failed: {cause}")]
pub struct SubscriptionError {
    pub path: String,
    #[source]
    pub cause: StoreError,
}

/// Resubscribe backoff
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Delay before the first resubscribe attempt
    pub initial_backoff: Duration,
    /// Upper bound for the doubled delay
    pub max_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

type FeedKey = (String, CollectionQuery);
/// Raw state of a feed, shared by every handle
pub type FeedState = LoadState<Arc<VersionedSnapshot>>;

/// One store subscription shared by all handles with the same key
struct SharedFeed {
    path: String,
    state: watch::Receiver<FeedState>,
    task: JoinHandle<()>,
}

impl Drop for SharedFeed {
    fn drop(&mut self) {
        self.task.abort();
        debug!(path = %self.path, "Released collection subscription");
    }
}

/// Deduplicating subscription registry over a `DocumentStore`.
pub struct StreamHub<S: DocumentStore> {
    store: Arc<S>,
    config: StreamConfig,
    metrics: Arc<EngineMetrics>,
    feeds: Mutex<HashMap<FeedKey, Weak<SharedFeed>>>,
}

impl<S: DocumentStore> StreamHub<S> {
    pub fn new(store: Arc<S>, config: StreamConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            store,
            config,
            metrics,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Subscribe to a collection query.
    ///
    /// Must be called from within a tokio runtime. Reuses the running feed
    /// when another live handle holds the same `(path, query)`.
    pub fn subscribe<T: DeserializeOwned>(&self, path: &str, query: CollectionQuery) -> Subscription<T> {
        let key = (path.to_string(), query);
        let mut feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);

        let feed = match feeds.get(&key).and_then(Weak::upgrade) {
            Some(feed) => {
                debug!(path, "Sharing existing collection subscription");
                feed
            }
            None => {
                let feed = Arc::new(self.spawn_feed(key.clone()));
                feeds.insert(key, Arc::downgrade(&feed));
                feed
            }
        };
        feeds.retain(|_, feed| feed.strong_count() > 0);

        Subscription::new(feed, self.metrics.clone())
    }

    /// Number of distinct store subscriptions currently held
    pub fn active_feeds(&self) -> usize {
        let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        feeds.values().filter(|feed| feed.strong_count() > 0).count()
    }

    fn spawn_feed(&self, (path, query): FeedKey) -> SharedFeed {
        let (sender, receiver) = watch::channel(LoadState::Pending);
        info!(path = %path, filters = query.filters.len(), "Opening collection subscription");

        let task = tokio::spawn(run_feed(
            self.store.clone(),
            path.clone(),
            query,
            self.config.clone(),
            self.metrics.clone(),
            sender,
        ));

        SharedFeed {
            path,
            state: receiver,
            task,
        }
    }
}

/// Subscribe, forward snapshots, and resubscribe with backoff on failure.
async fn run_feed<S: DocumentStore>(
    store: Arc<S>,
    path: String,
    query: CollectionQuery,
    config: StreamConfig,
    metrics: Arc<EngineMetrics>,
    state: watch::Sender<FeedState>,
) {
    let mut version = 0u64;
    let mut backoff = config.initial_backoff;
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            metrics.record_resubscription();
        }
        attempt += 1;

        let cause = match store.subscribe_collection(&path, &query).await {
            Ok(mut feed) => {
                let mut cause = StoreError::Closed;
                while let Some(delivery) = feed.recv().await {
                    match delivery {
                        Ok(raw) => {
                            version += 1;
                            backoff = config.initial_backoff;
                            metrics.record_snapshot_received();
                            state.send_replace(LoadState::Ready(Arc::new(VersionedSnapshot { version, raw })));
                        }
                        Err(err) => {
                            cause = err;
                            break;
                        }
                    }
                }
                cause
            }
            Err(err) => err,
        };

        if state.is_closed() {
            return;
        }

        metrics.record_subscription_failure();
        warn!(
            path = %path,
            cause = %cause,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            "Subscription failed, resubscribing"
        );
        state.send_replace(LoadState::Failed(SubscriptionError {
            path: path.clone(),
            cause,
        }));

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_backoff);
    }
}

/// Owned handle to a live, typed snapshot stream.
///
/// Dropping the handle (or calling `unsubscribe`) releases the store
/// subscription once no other handle shares it.
pub struct Subscription<T> {
    feed: Arc<SharedFeed>,
    state: watch::Receiver<FeedState>,
    metrics: Arc<EngineMetrics>,
    /// Documents handed out by the last `next`/`next_raw`
    delivered: DocumentIndex,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    fn new(feed: Arc<SharedFeed>, metrics: Arc<EngineMetrics>) -> Self {
        let mut state = feed.state.clone();
        // The current value is returned by `next` first
        state.mark_changed();
        Self {
            feed,
            state,
            metrics,
            delivered: DocumentIndex::new(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &str {
        &self.feed.path
    }

    /// Latest state without waiting.
    ///
    /// Does not count as a delivery: the next `next` still diffs against
    /// the previous one.
    pub fn current(&self) -> LoadState<Snapshot<T>> {
        let state = self.state.borrow().clone();
        self.decode(self.rebase(state))
    }

    /// Wait for the next state change and return the latest state.
    ///
    /// Intermediate snapshots delivered while the caller was busy are
    /// skipped. Returns `None` once the feed has shut down.
    pub async fn next(&mut self) -> Option<LoadState<Snapshot<T>>> {
        self.state.changed().await.ok()?;
        let state = self.state.borrow_and_update().clone();
        let state = self.advance(state);
        Some(self.decode(state))
    }

    /// Latest raw snapshot, for consumers that decode records themselves
    pub fn current_raw(&self) -> FeedState {
        let state = self.state.borrow().clone();
        self.rebase(state)
    }

    /// Wait for the next state change, returning the raw snapshot.
    pub async fn next_raw(&mut self) -> Option<FeedState> {
        self.state.changed().await.ok()?;
        let state = self.state.borrow_and_update().clone();
        Some(self.advance(state))
    }

    pub fn unsubscribe(self) {
        debug!(path = %self.feed.path, "Unsubscribing");
    }

    /// Replace the store diff with the diff against this handle's last delivery
    fn rebase(&self, state: FeedState) -> FeedState {
        state.map(|snapshot| {
            Arc::new(VersionedSnapshot {
                version: snapshot.version,
                raw: RawSnapshot {
                    changes: snapshot.raw.diff_against(&self.delivered),
                    documents: snapshot.raw.documents.clone(),
                },
            })
        })
    }

    fn advance(&mut self, state: FeedState) -> FeedState {
        let state = self.rebase(state);
        if let LoadState::Ready(snapshot) = &state {
            self.delivered = snapshot.raw.index();
        }
        state
    }

    fn decode(&self, state: FeedState) -> LoadState<Snapshot<T>> {
        state.map(|snapshot| Snapshot::decode(&snapshot, &self.metrics))
    }
}
