//! Lap record types
//!
//! A lap record asserts that one runner completed one lap at a point in
//! time. Records are immutable once written.

use crate::errors::DataQualityWarning;
use crate::ids::{LapId, RunnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lap document as stored under the laps collection.
///
/// Both fields are optional on the wire so that a malformed record can be
/// reported and skipped instead of failing the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapDocument {
    #[serde(default)]
    pub runner_id: Option<RunnerId>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LapDocument {
    pub fn new(runner_id: RunnerId, timestamp: DateTime<Utc>) -> Self {
        Self {
            runner_id: Some(runner_id),
            timestamp: Some(timestamp),
        }
    }
}

/// A validated lap record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapRecord {
    pub id: LapId,
    pub runner_id: RunnerId,
    pub timestamp: DateTime<Utc>,
}

impl LapRecord {
    /// Validate a stored document into a lap record.
    pub fn from_document(id: LapId, doc: &LapDocument) -> Result<Self, DataQualityWarning> {
        let runner_id = match &doc.runner_id {
            Some(runner_id) if !runner_id.as_str().is_empty() => runner_id.clone(),
            _ => {
                return Err(DataQualityWarning::MissingField {
                    record_id: id.to_string(),
                    field: "runnerId",
                })
            }
        };

        let timestamp = doc.timestamp.ok_or_else(|| DataQualityWarning::MissingField {
            record_id: id.to_string(),
            field: "timestamp",
        })?;

        Ok(Self {
            id,
            runner_id,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_lap_document_uses_camel_case() {
        let doc: LapDocument = serde_json::from_value(json!({
            "runnerId": "r1",
            "timestamp": "2023-09-23T10:15:00Z"
        }))
        .unwrap();

        let record = LapRecord::from_document(LapId::new("l1"), &doc).unwrap();
        assert_eq!(record.runner_id, RunnerId::new("r1"));
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2023, 9, 23, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_timestamp_is_reported() {
        let doc: LapDocument = serde_json::from_value(json!({ "runnerId": "r1" })).unwrap();
        let err = LapRecord::from_document(LapId::new("l2"), &doc).unwrap_err();
        assert_eq!(
            err,
            DataQualityWarning::MissingField {
                record_id: "l2".to_string(),
                field: "timestamp",
            }
        );
    }

    #[test]
    fn test_empty_runner_id_is_reported() {
        let doc = LapDocument {
            runner_id: Some(RunnerId::new("")),
            timestamp: Some(Utc::now()),
        };
        let err = LapRecord::from_document(LapId::new("l3"), &doc).unwrap_err();
        assert!(err.to_string().contains("runnerId"));
    }

    proptest! {
        #[test]
        fn prop_valid_iff_both_fields_present(
            has_runner in any::<bool>(),
            has_timestamp in any::<bool>(),
            secs in 0i64..4_000_000_000,
        ) {
            let doc = LapDocument {
                runner_id: has_runner.then(|| RunnerId::new("r")),
                timestamp: has_timestamp.then(|| Utc.timestamp_opt(secs, 0).unwrap()),
            };
            let result = LapRecord::from_document(LapId::new("l"), &doc);
            prop_assert_eq!(result.is_ok(), has_runner && has_timestamp);
        }
    }
}
