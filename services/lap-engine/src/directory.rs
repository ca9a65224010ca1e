//! Runner directory
//!
//! Keeps the current set of runner profiles, rebuilt wholesale from every
//! runners snapshot, and registers walk-in runners with the next free start
//! number.
//!
//! Start numbers come from a counter document updated in the same store
//! transaction that creates the runner, so concurrent registrations never
//! hand out the same number.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::errors::{NotFoundError, ValidationError};
use types::ids::RunnerId;
use types::runner::{Runner, RunnerDocument};

use crate::load_state::LoadState;
use crate::metrics::EngineMetrics;
use crate::store::{CollectionQuery, DocumentStore, StoreError, Transaction};
use crate::stream::{StreamHub, Subscription};

/// Field of the counter document holding the last assigned number
pub const LAST_NUMBER_FIELD: &str = "lastNumber";

/// Directory configuration
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Collection holding runner documents
    pub runners_path: String,
    /// Document holding the last assigned start number
    pub counter_path: String,
    /// Transaction attempts before giving up on a contended counter
    pub max_attempts: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            runners_path: "apps/24-stunden-lauf/runners".to_string(),
            counter_path: "apps/24-stunden-lauf/counters/runners".to_string(),
            max_attempts: 5,
        }
    }
}

/// Errors from runner registration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Invalid runner: {0}")]
    Validation(#[from] ValidationError),

    #[error("Start number still contended after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type RunnerMap = BTreeMap<RunnerId, Runner>;
pub type DirectoryState = LoadState<Arc<RunnerMap>>;

/// Live runner profiles plus the registration write path.
pub struct RunnerDirectory<S: DocumentStore> {
    store: Arc<S>,
    config: DirectoryConfig,
    metrics: Arc<EngineMetrics>,
    state: watch::Receiver<DirectoryState>,
    task: JoinHandle<()>,
}

impl<S: DocumentStore> RunnerDirectory<S> {
    /// Subscribe to the runners collection. Must be called within a tokio runtime.
    pub fn start(hub: &StreamHub<S>, config: DirectoryConfig) -> Self {
        let runners = hub.subscribe::<RunnerDocument>(&config.runners_path, CollectionQuery::all());
        let (sender, receiver) = watch::channel(LoadState::Pending);
        let task = tokio::spawn(run_directory(runners, sender));
        info!(path = %config.runners_path, "Starting runner directory");

        Self {
            store: hub.store().clone(),
            config,
            metrics: hub.metrics().clone(),
            state: receiver,
            task,
        }
    }

    /// Current runners keyed by id
    pub fn snapshot(&self) -> DirectoryState {
        self.state.borrow().clone()
    }

    pub fn updates(&self) -> watch::Receiver<DirectoryState> {
        self.state.clone()
    }

    pub fn get(&self, runner_id: &RunnerId) -> LoadState<Result<Runner, NotFoundError>> {
        self.snapshot().map(|runners| {
            runners.get(runner_id).cloned().ok_or_else(|| NotFoundError::Runner {
                runner_id: runner_id.to_string(),
            })
        })
    }

    /// Runner registered with `email`, compared case-insensitively
    pub fn find_by_email(&self, email: &str) -> LoadState<Result<Runner, NotFoundError>> {
        let wanted = email.trim();
        self.snapshot().map(|runners| {
            runners
                .values()
                .find(|runner| {
                    runner
                        .email
                        .as_deref()
                        .map(|e| e.trim().eq_ignore_ascii_case(wanted))
                        .unwrap_or(false)
                })
                .cloned()
                .ok_or_else(|| NotFoundError::RunnerEmail {
                    email: wanted.to_string(),
                })
        })
    }

    /// Register a staff runner and return its start number.
    ///
    /// Numbers start at 1 and increase by one per registration.
    pub async fn create_runner(&self, name: &str) -> Result<u32, DirectoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }

        for attempt in 1..=self.config.max_attempts {
            let mut assigned = 0u32;
            let mut body = |tx: &mut Transaction<'_>| -> Result<(), StoreError> {
                assigned = assign_number(tx, &self.config, name)?;
                Ok(())
            };

            match self.store.run_transaction(&mut body).await {
                Ok(()) => {
                    self.metrics.record_runner_created();
                    info!(number = assigned, attempt, "Runner created");
                    return Ok(assigned);
                }
                Err(StoreError::Contention { path }) => {
                    self.metrics.record_number_conflict();
                    debug!(path = %path, attempt, "Start number contended, retrying");
                    tokio::task::yield_now().await;
                }
                Err(err) => {
                    warn!(error = %err, "Runner creation failed");
                    return Err(err.into());
                }
            }
        }

        warn!(attempts = self.config.max_attempts, "Giving up on start number");
        Err(DirectoryError::Conflict {
            attempts: self.config.max_attempts,
        })
    }
}

impl<S: DocumentStore> Drop for RunnerDirectory<S> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read the counter, bump it, and create the runner in one transaction.
fn assign_number(tx: &mut Transaction<'_>, config: &DirectoryConfig, name: &str) -> Result<u32, StoreError> {
    let last = tx
        .get(&config.counter_path)?
        .and_then(|fields| fields.get(LAST_NUMBER_FIELD).and_then(Value::as_u64))
        .unwrap_or(0);
    let number = u32::try_from(last + 1)
        .map_err(|_| StoreError::Serialization(format!("start number {} out of range", last + 1)))?;

    let document = serde_json::to_value(RunnerDocument::staff(name, number))
        .map_err(|err| StoreError::Serialization(err.to_string()))?;

    tx.set(config.counter_path.clone(), json!({ LAST_NUMBER_FIELD: number }));
    tx.create(config.runners_path.clone(), document);
    Ok(number)
}

async fn run_directory(mut runners: Subscription<RunnerDocument>, sender: watch::Sender<DirectoryState>) {
    while let Some(state) = runners.next().await {
        let published = state.map(|snapshot| {
            let map: RunnerMap = snapshot
                .records
                .into_iter()
                .map(|record| {
                    let id = RunnerId::new(record.id);
                    (id.clone(), Runner::from_document(id, record.data))
                })
                .collect();
            debug!(version = snapshot.version, runners = map.len(), "Runner directory rebuilt");
            Arc::new(map)
        });

        if sender.send(published).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::stream::StreamConfig;
    use std::time::Duration;

    fn setup(store: &MemoryStore) -> (StreamHub<MemoryStore>, DirectoryConfig) {
        let hub = StreamHub::new(
            Arc::new(store.clone()),
            StreamConfig::default(),
            Arc::new(EngineMetrics::new()),
        );
        (hub, DirectoryConfig::default())
    }

    async fn wait_for_runners(directory: &RunnerDirectory<MemoryStore>, count: usize) -> Arc<RunnerMap> {
        let mut updates = directory.updates();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|state| matches!(state, LoadState::Ready(map) if map.len() >= count)),
        )
        .await
        .expect("timed out")
        .expect("directory stopped")
        .clone();
        state.ready().unwrap()
    }

    #[tokio::test]
    async fn test_create_runner_assigns_sequential_numbers() {
        let store = MemoryStore::new();
        let (hub, config) = setup(&store);
        let directory = RunnerDirectory::start(&hub, config);

        assert_eq!(directory.create_runner("D").await.unwrap(), 1);
        assert_eq!(directory.create_runner("E").await.unwrap(), 2);

        let runners = wait_for_runners(&directory, 2).await;
        let mut numbers: Vec<u32> = runners.values().map(|r| r.number).collect();
        numbers.sort();
        assert_eq!(numbers, vec![1, 2]);
        assert!(runners.values().all(|r| !r.is_student()));
    }

    #[tokio::test]
    async fn test_create_runner_rejects_blank_name() {
        let store = MemoryStore::new();
        let (hub, config) = setup(&store);
        let directory = RunnerDirectory::start(&hub, config);

        assert_eq!(
            directory.create_runner("   ").await,
            Err(DirectoryError::Validation(ValidationError::EmptyName))
        );
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_email() {
        let store = MemoryStore::new();
        store
            .set_document(
                "apps/24-stunden-lauf/runners/r1",
                json!({
                    "name": "Alice",
                    "number": 7,
                    "type": "student",
                    "class": "10a",
                    "house": "Red",
                    "email": "alice@school.example"
                }),
            )
            .unwrap();
        let (hub, config) = setup(&store);
        let directory = RunnerDirectory::start(&hub, config);
        wait_for_runners(&directory, 1).await;

        let alice = directory.get(&RunnerId::new("r1")).ready().unwrap().unwrap();
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.class(), Some("10a"));

        let by_email = directory.find_by_email("Alice@School.example").ready().unwrap().unwrap();
        assert_eq!(by_email.id, RunnerId::new("r1"));

        assert_eq!(
            directory.get(&RunnerId::new("nope")).ready().unwrap(),
            Err(NotFoundError::Runner {
                runner_id: "nope".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_get_is_pending_before_first_snapshot() {
        let store = MemoryStore::new();
        let (hub, config) = setup(&store);
        let directory = RunnerDirectory::start(&hub, config);
        assert!(directory.get(&RunnerId::new("r1")).is_pending());
    }
}
