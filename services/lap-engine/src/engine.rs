//! Engine facade
//!
//! Wires the stream hub, runner directory and lap board together and joins
//! their live states at read time. Every read that depends on live data
//! returns a `LoadState`; a join is only `Ready` when both sides are.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use thiserror::Error;
use tracing::info;
use types::errors::NotFoundError;
use types::ids::RunnerId;
use types::lap::LapDocument;
use types::settings::EventSettings;

use crate::board::{BoardState, LapBoard, LapBoardView};
use crate::clock::Clock;
use crate::config::{load_settings, ConfigSource};
use crate::directory::{DirectoryConfig, DirectoryError, DirectoryState, RunnerDirectory, RunnerMap};
use crate::filter::{visible, FilterCriteria, VisibleEntry};
use crate::histogram::{build_histogram, laps_in_hour, HistogramConfig, HourBucket};
use crate::load_state::LoadState;
use crate::metrics::EngineMetrics;
use crate::ranking::Ranking;
use crate::stats::{Progress, StatsReport, StatsSnapshot};
use crate::store::{CollectionQuery, DocumentStore};
use crate::stream::{StreamConfig, StreamHub, Subscription};

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Collection holding lap documents
    pub laps_path: String,
    pub directory: DirectoryConfig,
    pub stream: StreamConfig,
    pub histogram: HistogramConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            laps_path: "apps/24-stunden-lauf/laps".to_string(),
            directory: DirectoryConfig::default(),
            stream: StreamConfig::default(),
            histogram: HistogramConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if self.laps_path.is_empty() || self.directory.runners_path.is_empty() {
            return invalid("collection paths must not be empty");
        }
        if self.directory.counter_path.is_empty() {
            return invalid("counter path must not be empty");
        }
        if self.directory.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.stream.initial_backoff.is_zero() || self.stream.initial_backoff > self.stream.max_backoff {
            return invalid("initial_backoff must be positive and not exceed max_backoff");
        }
        if self.histogram.window_hours == 0 {
            return invalid("histogram window must cover at least one hour");
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Live ranking and statistics over one event.
pub struct LapEngine<S: DocumentStore> {
    hub: StreamHub<S>,
    directory: RunnerDirectory<S>,
    board: LapBoard,
    settings: RwLock<EventSettings>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> LapEngine<S> {
    /// Validate the config and open the runner and lap subscriptions.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(
        store: Arc<S>,
        config: EngineConfig,
        settings: EventSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let hub = StreamHub::new(store, config.stream.clone(), metrics.clone());
        let directory = RunnerDirectory::start(&hub, config.directory.clone());
        let board = LapBoard::start(hub.subscribe(&config.laps_path, CollectionQuery::all()), metrics);

        info!(
            laps_path = %config.laps_path,
            runners_path = %config.directory.runners_path,
            "Lap engine started"
        );

        Ok(Self {
            hub,
            directory,
            board,
            settings: RwLock::new(settings),
            config,
            clock,
        })
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        self.hub.metrics()
    }

    pub fn hub(&self) -> &StreamHub<S> {
        &self.hub
    }

    pub fn directory(&self) -> &RunnerDirectory<S> {
        &self.directory
    }

    pub fn board(&self) -> BoardState {
        self.board.current()
    }

    pub fn settings(&self) -> EventSettings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Re-read the event settings from the config collaborator
    pub fn reload_settings(&self, source: &dyn ConfigSource) {
        let settings = load_settings(source);
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Wait until both runners and laps have delivered a snapshot
    pub async fn wait_ready(&self) {
        let mut board = self.board.updates();
        let mut directory = self.directory.updates();
        let _ = board.wait_for(LoadState::is_ready).await;
        let _ = directory.wait_for(LoadState::is_ready).await;
    }

    fn joined(&self) -> LoadState<(Arc<LapBoardView>, Arc<RunnerMap>)> {
        self.board.current().join(self.directory.snapshot())
    }

    pub fn ranking(&self) -> LoadState<Ranking> {
        self.board.current().map(|view| view.ranking.clone())
    }

    /// 0-based position; `Ready(None)` when the runner has no laps yet
    pub fn position(&self, runner_id: &RunnerId) -> LoadState<Option<usize>> {
        self.board.current().map(|view| view.ranking.position(runner_id))
    }

    /// Filtered leaderboard with global positions
    pub fn visible(&self, criteria: &FilterCriteria) -> LoadState<Vec<VisibleEntry>> {
        let settings = self.settings();
        self.joined()
            .map(|(view, runners)| visible(&view.ranking, &runners, criteria, &settings))
    }

    pub fn stats_snapshot(&self) -> LoadState<StatsSnapshot> {
        self.joined()
            .map(|(view, runners)| StatsSnapshot::join(&runners, &view.counts))
    }

    /// Hourly histogram ending at the configured event end, or now
    pub fn histogram(&self) -> LoadState<Vec<HourBucket>> {
        self.board.current().map(|view| self.histogram_of(&view))
    }

    fn histogram_of(&self, view: &LapBoardView) -> Vec<HourBucket> {
        let reference = self.config.histogram.event_end.unwrap_or_else(|| self.clock.now());
        build_histogram(&view.laps, reference, &self.config.histogram)
    }

    /// Laps with a timestamp in `[start, start + 1h)`
    pub fn laps_in_hour(&self, start: DateTime<Utc>) -> LoadState<u64> {
        self.board.current().map(|view| laps_in_hour(&view.laps, start))
    }

    /// Statistics page content; every figure comes from the same lap board
    pub fn report(&self) -> LoadState<StatsReport> {
        let settings = self.settings();
        self.joined().map(|(view, runners)| {
            let stats = StatsSnapshot::join(&runners, &view.counts);
            StatsReport::build(&stats, self.histogram_of(&view), &settings)
        })
    }

    pub fn progress(&self, runner_id: &RunnerId) -> LoadState<Result<Progress, NotFoundError>> {
        self.board
            .current()
            .join(self.directory.get(runner_id))
            .map(|(view, runner)| {
                runner.map(|runner| Progress {
                    current: view.counts.get(&runner.id),
                    goal: runner.goal,
                })
            })
    }

    /// Progress of the runner registered under `email`
    pub fn progress_by_email(&self, email: &str) -> LoadState<Result<Progress, NotFoundError>> {
        self.board
            .current()
            .join(self.directory.find_by_email(email))
            .map(|(view, runner)| {
                runner.map(|runner| Progress {
                    current: view.counts.get(&runner.id),
                    goal: runner.goal,
                })
            })
    }

    /// Register a walk-in runner; returns the start number
    pub async fn create_runner(&self, name: &str) -> Result<u32, EngineError> {
        Ok(self.directory.create_runner(name).await?)
    }

    /// Live laps of a single runner
    pub fn runner_laps(&self, runner_id: &RunnerId) -> Subscription<LapDocument> {
        self.hub.subscribe(
            &self.config.laps_path,
            CollectionQuery::all().where_eq("runnerId", runner_id.as_str()),
        )
    }

    pub fn runners(&self) -> DirectoryState {
        self.directory.snapshot()
    }
}
