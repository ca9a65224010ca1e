//! Lap count aggregation
//!
//! Folds lap snapshots into a count per runner. A full snapshot recomputes
//! every count from scratch, so applying the same snapshot twice is a no-op.
//! Each runner also keeps the document position of its first lap, used as
//! the ranking tie-break.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use types::ids::{LapId, RunnerId};
use types::lap::{LapDocument, LapRecord};

use crate::events::{ChangeKind, Change, Record, Snapshot};
use crate::metrics::EngineMetrics;

/// Count and tie-break key of one runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapTally {
    pub count: u64,
    /// Order in which the runner's first lap appeared in the stream
    pub first_seen: u64,
}

/// Lap count per runner. Runners without laps are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LapCounts {
    tallies: BTreeMap<RunnerId, LapTally>,
}

impl LapCounts {
    /// Lap count of a runner, 0 when it has none
    pub fn get(&self, runner_id: &RunnerId) -> u64 {
        self.tallies.get(runner_id).map(|t| t.count).unwrap_or(0)
    }

    pub fn tally(&self, runner_id: &RunnerId) -> Option<&LapTally> {
        self.tallies.get(runner_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RunnerId, &LapTally)> {
        self.tallies.iter()
    }

    /// Sum over all runners
    pub fn total(&self) -> u64 {
        self.tallies.values().map(|t| t.count).sum()
    }

    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }
}

/// Maintains lap counts from the lap stream.
#[derive(Debug, Default)]
pub struct LapAggregator {
    counts: LapCounts,
    laps: Vec<LapRecord>,
    next_order: u64,
    version: u64,
}

impl LapAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all state with the content of a full snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot<LapDocument>, metrics: &EngineMetrics) {
        self.counts = LapCounts::default();
        self.laps = Vec::with_capacity(snapshot.records.len());
        self.next_order = 0;

        for record in &snapshot.records {
            if let Some(lap) = validate(record, metrics) {
                self.count_lap(&lap.runner_id);
                self.laps.push(lap);
            }
        }

        self.version = snapshot.version;
        metrics.record_snapshot_applied();
        debug!(
            version = snapshot.version,
            laps = self.laps.len(),
            runners = self.counts.len(),
            "Applied lap snapshot"
        );
    }

    /// Apply a single incremental change.
    ///
    /// `added` increments, `removed` decrements (never below zero), and
    /// `modified` leaves counts unchanged.
    pub fn apply_change(&mut self, change: &Change<LapDocument>, metrics: &EngineMetrics) {
        let Some(lap) = validate(&change.record, metrics) else {
            return;
        };

        match change.kind {
            ChangeKind::Added => {
                self.count_lap(&lap.runner_id);
                self.laps.push(lap);
            }
            ChangeKind::Removed => {
                self.uncount_lap(&lap.runner_id);
                self.laps.retain(|existing| existing.id != lap.id);
            }
            ChangeKind::Modified => {
                if let Some(existing) = self.laps.iter_mut().find(|existing| existing.id == lap.id) {
                    *existing = lap;
                }
            }
        }
    }

    fn count_lap(&mut self, runner_id: &RunnerId) {
        let next_order = &mut self.next_order;
        let tally = self.counts.tallies.entry(runner_id.clone()).or_insert_with(|| {
            let tally = LapTally {
                count: 0,
                first_seen: *next_order,
            };
            *next_order += 1;
            tally
        });
        tally.count += 1;
    }

    fn uncount_lap(&mut self, runner_id: &RunnerId) {
        if let Some(tally) = self.counts.tallies.get_mut(runner_id) {
            tally.count = tally.count.saturating_sub(1);
            if tally.count == 0 {
                self.counts.tallies.remove(runner_id);
            }
        }
    }

    pub fn counts(&self) -> &LapCounts {
        &self.counts
    }

    pub fn count(&self, runner_id: &RunnerId) -> u64 {
        self.counts.get(runner_id)
    }

    /// Valid laps, in stream order
    pub fn laps(&self) -> &[LapRecord] {
        &self.laps
    }

    /// Version of the last applied full snapshot
    pub fn version(&self) -> u64 {
        self.version
    }
}

fn validate(record: &Record<LapDocument>, metrics: &EngineMetrics) -> Option<LapRecord> {
    match LapRecord::from_document(LapId::new(record.id.clone()), &record.data) {
        Ok(lap) => Some(lap),
        Err(warning) => {
            metrics.record_malformed(&record.id);
            warn!(lap_id = %record.id, %warning, "Skipping malformed lap record");
            None
        }
    }
}
