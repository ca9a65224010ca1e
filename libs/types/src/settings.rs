//! Event-wide settings served by the remote config collaborator
//!
//! Slow-changing values: lap distance, the known classes and houses, and
//! the short names used when house labels need to fit a chart legend.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Remote config key for the lap distance in meters
pub const KEY_DISTANCE_PER_LAP: &str = "distancePerLap";
/// Remote config key for the list of class names
pub const KEY_CLASSES: &str = "classes";
/// Remote config key for the list of house names
pub const KEY_HOUSES: &str = "houses";
/// Remote config key for the house abbreviation table
pub const KEY_HOUSE_ABBREVIATIONS: &str = "houseAbbreviationTranslations";

/// Lap distance used when the remote config has no value, in meters
pub const DEFAULT_DISTANCE_PER_LAP: Decimal = Decimal::from_parts(660, 0, 0, false, 0);

/// Mapping from a full house name to its short label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseAbbreviation {
    pub name: String,
    pub abbreviation: String,
}

/// Cached event settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Lap distance in meters
    pub distance_per_lap: Decimal,
    pub classes: Vec<String>,
    pub houses: Vec<String>,
    pub house_abbreviations: Vec<HouseAbbreviation>,
}

impl EventSettings {
    /// Short label for a house, falling back to the full name
    pub fn abbreviate_house<'a>(&'a self, house: &'a str) -> &'a str {
        self.house_abbreviations
            .iter()
            .find(|translation| translation.name == house)
            .map(|translation| translation.abbreviation.as_str())
            .unwrap_or(house)
    }

    /// Distance covered by `laps` laps, in kilometers, rounded to 2 places
    pub fn distance_km(&self, laps: u64) -> Decimal {
        (Decimal::from(laps) * self.distance_per_lap / Decimal::ONE_THOUSAND).round_dp(2)
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            distance_per_lap: DEFAULT_DISTANCE_PER_LAP,
            classes: Vec::new(),
            houses: Vec::new(),
            house_abbreviations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_default_distance() {
        assert_eq!(EventSettings::default().distance_per_lap, Decimal::from(660));
    }

    #[test]
    fn test_abbreviate_known_house() {
        let settings = EventSettings {
            house_abbreviations: vec![HouseAbbreviation {
                name: "Haus am See".to_string(),
                abbreviation: "HaS".to_string(),
            }],
            ..EventSettings::default()
        };

        assert_eq!(settings.abbreviate_house("Haus am See"), "HaS");
        assert_eq!(settings.abbreviate_house("Red"), "Red");
    }

    #[test]
    fn test_distance_km_rounds_to_two_places() {
        let settings = EventSettings {
            distance_per_lap: Decimal::from_str("333.333").unwrap(),
            ..EventSettings::default()
        };

        // 3 * 333.333 m = 0.999999 km
        assert_eq!(settings.distance_km(3), Decimal::from_str("1.00").unwrap());
        assert_eq!(settings.distance_km(0), Decimal::ZERO);
    }
}
