//! Statistics summarizer
//!
//! Grouped sums and averages over an immutable `(runner, lap count)`
//! snapshot. Every directory runner takes part, with 0 laps if it has none.
//! Staff fall under the staff group for both house and class keys.

use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::RunnerId;
use types::runner::Runner;
use types::settings::EventSettings;

use crate::aggregator::LapCounts;
use crate::directory::RunnerMap;
use crate::histogram::HourBucket;
use crate::ranking::Ranking;

/// A runner joined with its lap count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerWithLapCount {
    pub runner: Runner,
    pub lap_count: u64,
}

/// Progress of one runner towards its goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    /// `None` when the runner set no goal; `as_pair` reports it as 0
    pub goal: Option<u32>,
}

impl Progress {
    /// `(current, goal)` with an unset goal as 0
    pub fn as_pair(&self) -> (u64, u32) {
        (self.current, self.goal.unwrap_or(0))
    }

    /// `current / goal`, `None` without a goal
    pub fn ratio(&self) -> Option<Decimal> {
        self.goal
            .filter(|goal| *goal > 0)
            .map(|goal| Decimal::from(self.current) / Decimal::from(goal))
    }

    pub fn reached(&self) -> bool {
        self.goal.map_or(false, |goal| self.current >= u64::from(goal))
    }
}

/// Point-in-time join of the directory and the lap counts
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    entries: Vec<RunnerWithLapCount>,
    ranking: Ranking,
}

impl StatsSnapshot {
    pub fn join(runners: &RunnerMap, counts: &LapCounts) -> Self {
        let entries = runners
            .values()
            .map(|runner| RunnerWithLapCount {
                runner: runner.clone(),
                lap_count: counts.get(&runner.id),
            })
            .collect();

        Self {
            entries,
            ranking: Ranking::build(counts),
        }
    }

    pub fn entries(&self) -> &[RunnerWithLapCount] {
        &self.entries
    }

    /// Sum of lap counts per group key
    pub fn sum_by_group<F>(&self, key: F) -> BTreeMap<String, u64>
    where
        F: Fn(&Runner) -> &str,
    {
        let mut sums = BTreeMap::new();
        for entry in &self.entries {
            *sums.entry(key(&entry.runner).to_string()).or_insert(0) += entry.lap_count;
        }
        sums
    }

    /// Number of runners per group key
    pub fn count_by_group<F>(&self, key: F) -> BTreeMap<String, u64>
    where
        F: Fn(&Runner) -> &str,
    {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(key(&entry.runner).to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Average lap count per runner of each group.
    ///
    /// Only groups with at least one runner appear.
    pub fn average_by_group<F>(&self, key: F) -> BTreeMap<String, Decimal>
    where
        F: Fn(&Runner) -> &str,
    {
        let sums = self.sum_by_group(&key);
        let counts = self.count_by_group(&key);

        sums.into_iter()
            .filter_map(|(group, sum)| {
                let runners = *counts.get(&group)?;
                (runners > 0).then(|| (group, Decimal::from(sum) / Decimal::from(runners)))
            })
            .collect()
    }

    pub fn total_laps(&self) -> u64 {
        self.entries.iter().map(|entry| entry.lap_count).sum()
    }

    pub fn runner_count(&self) -> usize {
        self.entries.len()
    }

    /// 0 when there are no runners
    pub fn average_laps_per_runner(&self) -> Decimal {
        match self.runner_count() {
            0 => Decimal::ZERO,
            n => Decimal::from(self.total_laps()) / Decimal::from(n),
        }
    }

    pub fn total_distance_km(&self, settings: &EventSettings) -> Decimal {
        settings.distance_km(self.total_laps())
    }

    pub fn lap_count(&self, runner_id: &RunnerId) -> u64 {
        self.entries
            .iter()
            .find(|entry| &entry.runner.id == runner_id)
            .map(|entry| entry.lap_count)
            .unwrap_or(0)
    }

    pub fn progress(&self, runner: &Runner) -> Progress {
        Progress {
            current: self.lap_count(&runner.id),
            goal: runner.goal,
        }
    }

    /// 0-based ranking position, `None` without laps
    pub fn position(&self, runner: &Runner) -> Option<usize> {
        self.ranking.position(&runner.id)
    }

    pub fn ranking(&self) -> &Ranking {
        &self.ranking
    }
}

/// Serializable statistics page content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub runner_count: usize,
    pub total_laps: u64,
    /// Rounded to 2 places
    pub average_laps_per_runner: Decimal,
    /// Rounded up to a whole lap
    pub average_laps_per_runner_ceil: u64,
    pub total_distance_km: Decimal,
    pub laps_by_hour: Vec<HourBucket>,
    pub laps_by_house: BTreeMap<String, u64>,
    pub average_by_house: BTreeMap<String, Decimal>,
    pub laps_by_class: BTreeMap<String, u64>,
    pub average_by_class: BTreeMap<String, Decimal>,
    /// Short chart label per house key
    pub house_labels: BTreeMap<String, String>,
}

impl StatsReport {
    pub fn build(stats: &StatsSnapshot, laps_by_hour: Vec<HourBucket>, settings: &EventSettings) -> Self {
        let laps_by_house = stats.sum_by_group(Runner::house_group);
        let average = stats.average_laps_per_runner();

        let house_labels = laps_by_house
            .keys()
            .map(|house| (house.clone(), settings.abbreviate_house(house).to_string()))
            .collect();

        Self {
            runner_count: stats.runner_count(),
            total_laps: stats.total_laps(),
            average_laps_per_runner: average.round_dp(2),
            average_laps_per_runner_ceil: ceil_to_u64(average),
            total_distance_km: stats.total_distance_km(settings),
            laps_by_hour,
            average_by_house: round_all(stats.average_by_group(Runner::house_group)),
            laps_by_house,
            laps_by_class: stats.sum_by_group(Runner::class_group),
            average_by_class: round_all(stats.average_by_group(Runner::class_group)),
            house_labels,
        }
    }
}

fn round_all(values: BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
    values.into_iter().map(|(k, v)| (k, v.round_dp(2))).collect()
}

fn ceil_to_u64(value: Decimal) -> u64 {
    value.ceil().to_u64().unwrap_or(0)
}
