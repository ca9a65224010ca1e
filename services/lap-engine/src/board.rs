//! Live lap board
//!
//! Background task that folds every lap snapshot into counts and a fresh
//! ranking, then publishes the result as one immutable view. Readers always
//! see counts and ranking from the same snapshot.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::lap::{LapDocument, LapRecord};

use crate::aggregator::{LapAggregator, LapCounts};
use crate::load_state::LoadState;
use crate::metrics::EngineMetrics;
use crate::ranking::Ranking;
use crate::stream::Subscription;

/// Counts and ranking derived from one lap snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct LapBoardView {
    pub version: u64,
    pub counts: LapCounts,
    pub ranking: Ranking,
    /// Valid laps in stream order
    pub laps: Vec<LapRecord>,
}

pub type BoardState = LoadState<Arc<LapBoardView>>;

/// Owns the lap subscription and the task deriving the board from it.
pub struct LapBoard {
    state: watch::Receiver<BoardState>,
    task: JoinHandle<()>,
}

impl LapBoard {
    /// Start deriving from `laps`. Must be called within a tokio runtime.
    pub fn start(laps: Subscription<LapDocument>, metrics: Arc<EngineMetrics>) -> Self {
        let (sender, receiver) = watch::channel(LoadState::Pending);
        info!(path = laps.path(), "Starting lap board");
        let task = tokio::spawn(run_board(laps, metrics, sender));
        Self {
            state: receiver,
            task,
        }
    }

    /// Latest published view
    pub fn current(&self) -> BoardState {
        self.state.borrow().clone()
    }

    /// Receiver for change notifications
    pub fn updates(&self) -> watch::Receiver<BoardState> {
        self.state.clone()
    }
}

impl Drop for LapBoard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_board(
    mut laps: Subscription<LapDocument>,
    metrics: Arc<EngineMetrics>,
    sender: watch::Sender<BoardState>,
) {
    let mut aggregator = LapAggregator::new();

    while let Some(state) = laps.next().await {
        let published = match state {
            LoadState::Pending => LoadState::Pending,
            LoadState::Failed(err) => {
                warn!(error = %err, "Lap board waiting for resubscribe");
                LoadState::Failed(err)
            }
            LoadState::Ready(snapshot) => {
                aggregator.apply_snapshot(&snapshot, &metrics);
                let ranking = Ranking::build(aggregator.counts());
                metrics.record_ranking_built();
                debug!(
                    version = snapshot.version,
                    ranked = ranking.len(),
                    "Published lap board"
                );
                LoadState::Ready(Arc::new(LapBoardView {
                    version: snapshot.version,
                    counts: aggregator.counts().clone(),
                    ranking,
                    laps: aggregator.laps().to_vec(),
                }))
            }
        };

        if sender.send(published).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionQuery, MemoryStore};
    use crate::stream::{StreamConfig, StreamHub};
    use serde_json::json;
    use std::time::Duration;
    use types::ids::RunnerId;

    const LAPS: &str = "apps/test/laps";

    async fn wait_for_version(board: &LapBoard, version: u64) -> Arc<LapBoardView> {
        let mut updates = board.updates();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|state| matches!(state, LoadState::Ready(view) if view.version >= version)),
        )
        .await
        .expect("timed out")
        .expect("board stopped")
        .clone();
        state.ready().unwrap()
    }

    #[tokio::test]
    async fn test_board_tracks_lap_stream() {
        let store = MemoryStore::new();
        let metrics = Arc::new(EngineMetrics::new());
        let hub = StreamHub::new(Arc::new(store.clone()), StreamConfig::default(), metrics.clone());
        let board = LapBoard::start(hub.subscribe(LAPS, CollectionQuery::all()), metrics.clone());

        let empty = wait_for_version(&board, 1).await;
        assert!(empty.ranking.is_empty());

        for (id, runner) in [("l1", "a"), ("l2", "b"), ("l3", "b")] {
            store
                .set_document(
                    &format!("{LAPS}/{id}"),
                    json!({ "runnerId": runner, "timestamp": "2023-09-23T10:00:00Z" }),
                )
                .unwrap();
        }

        let view = wait_for_version(&board, 4).await;
        assert_eq!(view.counts.get(&RunnerId::new("b")), 2);
        assert_eq!(view.ranking.position(&RunnerId::new("b")), Some(0));
        assert_eq!(view.ranking.position(&RunnerId::new("a")), Some(1));
        assert_eq!(view.laps.len(), 3);
    }
}
