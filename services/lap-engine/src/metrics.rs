//! Engine counters
//!
//! Tracks snapshot throughput, skipped records, subscription failures and
//! runner registrations. Exported as a sorted map for scraping or logging.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Core counters for the lap engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Subscriptions
    pub snapshots_received: AtomicU64,
    pub subscription_failures: AtomicU64,
    pub resubscriptions: AtomicU64,

    // Derivation
    pub snapshots_applied: AtomicU64,
    /// Distinct record ids ever skipped as malformed
    pub malformed_records: AtomicU64,
    /// Every skip, including repeats of the same record on later snapshots
    pub malformed_skips: AtomicU64,
    pub rankings_built: AtomicU64,

    // Registration
    pub runners_created: AtomicU64,
    pub number_conflicts: AtomicU64,

    malformed_ids: Mutex<HashSet<String>>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot delivered by the store.
    pub fn record_snapshot_received(&self) {
        self.snapshots_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed or dropped subscription.
    pub fn record_subscription_failure(&self) {
        self.subscription_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resubscription(&self) {
        self.resubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot folded into derived state.
    pub fn record_snapshot_applied(&self) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record skipped as malformed.
    ///
    /// Snapshots are recomputed in full, so the same record is skipped on
    /// every delivery; `malformed_records` counts it once.
    pub fn record_malformed(&self, record_id: &str) {
        self.malformed_skips.fetch_add(1, Ordering::Relaxed);
        let first_time = self
            .malformed_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record_id.to_string());
        if first_time {
            self.malformed_records.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ranking_built(&self) {
        self.rankings_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_runner_created(&self) {
        self.runners_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a start number transaction that lost a race and was retried.
    pub fn record_number_conflict(&self) {
        self.number_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_records(&self) -> u64 {
        self.malformed_records.load(Ordering::Relaxed)
    }

    pub fn subscription_failures(&self) -> u64 {
        self.subscription_failures.load(Ordering::Relaxed)
    }

    pub fn number_conflicts(&self) -> u64 {
        self.number_conflicts.load(Ordering::Relaxed)
    }

    /// Export counters as a BTreeMap.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("snapshots_received".to_string(), self.snapshots_received.load(Ordering::Relaxed));
        m.insert("subscription_failures".to_string(), self.subscription_failures.load(Ordering::Relaxed));
        m.insert("resubscriptions".to_string(), self.resubscriptions.load(Ordering::Relaxed));
        m.insert("snapshots_applied".to_string(), self.snapshots_applied.load(Ordering::Relaxed));
        m.insert("malformed_records".to_string(), self.malformed_records.load(Ordering::Relaxed));
        m.insert("malformed_skips".to_string(), self.malformed_skips.load(Ordering::Relaxed));
        m.insert("rankings_built".to_string(), self.rankings_built.load(Ordering::Relaxed));
        m.insert("runners_created".to_string(), self.runners_created.load(Ordering::Relaxed));
        m.insert("number_conflicts".to_string(), self.number_conflicts.load(Ordering::Relaxed));
        m
    }
}
