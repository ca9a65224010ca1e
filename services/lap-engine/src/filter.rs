//! Leaderboard filtering
//!
//! Class, house and name predicates applied over the ranked list. Filtering
//! never touches counts or positions: a visible entry keeps its global
//! position.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::RunnerId;
use types::runner::{Runner, STAFF_GROUP};
use types::settings::EventSettings;

use crate::directory::RunnerMap;
use crate::ranking::Ranking;

/// Filter selection. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub class: Option<String>,
    pub house: Option<String>,
    /// Case-insensitive substring of the runner name
    pub name: Option<String>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn house(mut self, house: impl Into<String>) -> Self {
        self.house = Some(house.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn class_filter(&self) -> Option<&str> {
        non_empty(&self.class)
    }

    fn house_filter(&self) -> Option<&str> {
        non_empty(&self.house)
    }

    fn name_filter(&self) -> Option<&str> {
        non_empty(&self.name)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Whether `runner` passes `criteria`.
///
/// With a class or house set, students must match every set field and staff
/// pass only when the house filter is the staff group and no class is set.
pub fn matches(runner: &Runner, criteria: &FilterCriteria) -> bool {
    let class = criteria.class_filter();
    let house = criteria.house_filter();

    if class.is_some() || house.is_some() {
        let group_ok = if runner.is_student() {
            class.map_or(true, |c| runner.class() == Some(c)) && house.map_or(true, |h| runner.house() == Some(h))
        } else {
            house == Some(STAFF_GROUP) && class.is_none()
        };
        if !group_ok {
            return false;
        }
    }

    match criteria.name_filter() {
        Some(name) => runner.name.to_lowercase().contains(&name.to_lowercase()),
        None => true,
    }
}

/// A ranked runner that passed the filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleEntry {
    /// Position in the unfiltered ranking
    pub position: usize,
    pub runner: Runner,
    pub lap_count: u64,
    /// Distance in km, rounded to 2 places
    pub distance_km: Decimal,
}

impl VisibleEntry {
    pub fn runner_id(&self) -> &RunnerId {
        &self.runner.id
    }
}

/// Ranked entries whose runner is known and passes the filter, in ranking order.
pub fn visible(
    ranking: &Ranking,
    runners: &RunnerMap,
    criteria: &FilterCriteria,
    settings: &EventSettings,
) -> Vec<VisibleEntry> {
    ranking
        .entries()
        .iter()
        .filter_map(|entry| {
            let runner = runners.get(&entry.runner_id)?;
            matches(runner, criteria).then(|| VisibleEntry {
                position: entry.position,
                runner: runner.clone(),
                lap_count: entry.lap_count,
                distance_km: settings.distance_km(entry.lap_count),
            })
        })
        .collect()
}
