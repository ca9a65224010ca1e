//! Remote config access
//!
//! Event settings (lap distance, classes, houses, house abbreviations) are
//! read from a key/value config collaborator. Missing keys and values of the
//! wrong shape fall back to defaults with a warning.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use types::settings::{
    EventSettings, HouseAbbreviation, KEY_CLASSES, KEY_DISTANCE_PER_LAP, KEY_HOUSES, KEY_HOUSE_ABBREVIATIONS,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Key/value config collaborator
pub trait ConfigSource: Send + Sync {
    fn get_value(&self, key: &str) -> Option<Value>;
}

/// Typed read with a default.
pub fn get_or<T: DeserializeOwned>(source: &dyn ConfigSource, key: &str, default: T) -> T {
    match source.get_value(key) {
        None => default,
        Some(value) => match serde_json::from_value(value) {
            Ok(typed) => typed,
            Err(err) => {
                warn!(key, error = %err, "Config value has unexpected shape, using default");
                default
            }
        },
    }
}

/// Config held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    values: HashMap<String, Value>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Parse a JSON object of config keys
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(map) => Ok(Self {
                values: map.into_iter().collect(),
            }),
            other => Err(ConfigError::Validation(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            ))),
        }
    }
}

impl ConfigSource for StaticConfig {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read the event settings from `source`.
///
/// A non-positive lap distance is rejected in favour of the default.
pub fn load_settings(source: &dyn ConfigSource) -> EventSettings {
    let defaults = EventSettings::default();

    let distance = read_distance(source).unwrap_or(defaults.distance_per_lap);
    let distance_per_lap = if distance > Decimal::ZERO {
        distance
    } else {
        warn!(%distance, "Non-positive lap distance, using default");
        defaults.distance_per_lap
    };

    let settings = EventSettings {
        distance_per_lap,
        classes: get_or(source, KEY_CLASSES, defaults.classes),
        houses: get_or(source, KEY_HOUSES, defaults.houses),
        house_abbreviations: get_or::<Vec<HouseAbbreviation>>(
            source,
            KEY_HOUSE_ABBREVIATIONS,
            defaults.house_abbreviations,
        ),
    };

    info!(
        distance_per_lap = %settings.distance_per_lap,
        classes = settings.classes.len(),
        houses = settings.houses.len(),
        "Loaded event settings"
    );
    settings
}

/// The distance may be stored as a number or a numeric string.
fn read_distance(source: &dyn ConfigSource) -> Option<Decimal> {
    let value = source.get_value(KEY_DISTANCE_PER_LAP)?;
    let parsed = match &value {
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        Value::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        warn!(value = %value, "Unreadable lap distance, using default");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use types::settings::DEFAULT_DISTANCE_PER_LAP;

    #[test]
    fn test_defaults_when_empty() {
        let settings = load_settings(&StaticConfig::new());
        assert_eq!(settings, EventSettings::default());
        assert_eq!(settings.distance_per_lap, DEFAULT_DISTANCE_PER_LAP);
    }

    #[test]
    fn test_reads_all_keys() {
        let config = StaticConfig::new()
            .with(KEY_DISTANCE_PER_LAP, json!(400))
            .with(KEY_CLASSES, json!(["10a", "10b"]))
            .with(KEY_HOUSES, json!(["Red", "Blue"]))
            .with(
                KEY_HOUSE_ABBREVIATIONS,
                json!([{ "name": "Red", "abbreviation": "R" }]),
            );

        let settings = load_settings(&config);
        assert_eq!(settings.distance_per_lap, Decimal::from(400));
        assert_eq!(settings.classes, vec!["10a", "10b"]);
        assert_eq!(settings.abbreviate_house("Red"), "R");
        assert_eq!(settings.abbreviate_house("Blue"), "Blue");
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = StaticConfig::new()
            .with(KEY_DISTANCE_PER_LAP, json!(-5))
            .with(KEY_CLASSES, json!("10a"));

        let settings = load_settings(&config);
        assert_eq!(settings.distance_per_lap, DEFAULT_DISTANCE_PER_LAP);
        assert!(settings.classes.is_empty());
    }

    #[test]
    fn test_distance_as_string() {
        let config = StaticConfig::new().with(KEY_DISTANCE_PER_LAP, json!("412.5"));
        assert_eq!(load_settings(&config).distance_per_lap, "412.5".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_from_json() {
        let config = StaticConfig::from_json(r#"{ "houses": ["Red"] }"#).unwrap();
        assert_eq!(load_settings(&config).houses, vec!["Red"]);

        assert!(matches!(
            StaticConfig::from_json("[1, 2]"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(StaticConfig::from_json("{"), Err(ConfigError::Json(_))));
    }
}
