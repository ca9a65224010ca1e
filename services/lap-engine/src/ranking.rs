//! Ranking builder
//!
//! Total order over runners with at least one lap: lap count descending,
//! ties broken by the order in which a runner's first lap appeared in the
//! stream. The ranking is rebuilt from scratch on every count change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::RunnerId;

use crate::aggregator::LapCounts;

/// One ranked runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub runner_id: RunnerId,
    pub lap_count: u64,
    /// 0-based
    pub position: usize,
}

impl RankedEntry {
    /// 1-based place as shown on the leaderboard
    pub fn place(&self) -> usize {
        self.position + 1
    }

    pub fn medal(&self) -> Option<Medal> {
        Medal::for_position(self.position)
    }
}

/// Podium marker for the first three places
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medal {
    Gold,
    Silver,
    Bronze,
}

impl Medal {
    pub fn for_position(position: usize) -> Option<Medal> {
        match position {
            0 => Some(Medal::Gold),
            1 => Some(Medal::Silver),
            2 => Some(Medal::Bronze),
            _ => None,
        }
    }
}

/// Ranked list with position lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranking {
    entries: Vec<RankedEntry>,
    index: HashMap<RunnerId, usize>,
}

impl Ranking {
    pub fn build(counts: &LapCounts) -> Self {
        let mut ordered: Vec<_> = counts.iter().filter(|(_, tally)| tally.count > 0).collect();
        ordered.sort_by(|(a_id, a), (b_id, b)| {
            b.count
                .cmp(&a.count)
                .then(a.first_seen.cmp(&b.first_seen))
                .then_with(|| a_id.cmp(b_id))
        });

        let entries: Vec<RankedEntry> = ordered
            .into_iter()
            .enumerate()
            .map(|(position, (runner_id, tally))| RankedEntry {
                runner_id: runner_id.clone(),
                lap_count: tally.count,
                position,
            })
            .collect();

        let index = entries
            .iter()
            .map(|entry| (entry.runner_id.clone(), entry.position))
            .collect();

        Self { entries, index }
    }

    /// 0-based position of a runner.
    ///
    /// `None` when the runner has no laps yet.
    pub fn position(&self, runner_id: &RunnerId) -> Option<usize> {
        self.index.get(runner_id).copied()
    }

    pub fn entry(&self, runner_id: &RunnerId) -> Option<&RankedEntry> {
        self.position(runner_id).and_then(|position| self.entries.get(position))
    }

    pub fn lap_count(&self, runner_id: &RunnerId) -> u64 {
        self.entry(runner_id).map(|entry| entry.lap_count).unwrap_or(0)
    }

    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 over the ranked sequence.
    ///
    /// Two rankings with equal checksums list the same runners with the
    /// same counts in the same order.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.runner_id.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(entry.lap_count.to_le_bytes());
            hasher.update(b"|");
        }
        format!("{:x}", hasher.finalize())
    }
}
