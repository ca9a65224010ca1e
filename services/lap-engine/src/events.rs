//! Snapshot definitions for live collection queries
//!
//! A store subscription delivers `RawSnapshot`s: the complete current result
//! set of a query plus the per-document diff against the previous delivery.
//! The stream adapter stamps each delivery with a version and decodes it
//! into a typed `Snapshot<T>` for consumers.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use types::errors::DataQualityWarning;

use crate::metrics::EngineMetrics;

/// How a document changed relative to the previous snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// An untyped document as held by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

/// A single document change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document: Document,
}

/// Full result set of a query at one notification, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub documents: Vec<Document>,
    pub changes: Vec<DocumentChange>,
}

/// Fields of each document, keyed by id
pub type DocumentIndex = BTreeMap<String, Value>;

impl RawSnapshot {
    pub fn index(&self) -> DocumentIndex {
        self.documents
            .iter()
            .map(|doc| (doc.id.clone(), doc.fields.clone()))
            .collect()
    }

    /// Changes that turn `previous` into this snapshot's document set.
    ///
    /// Added and modified documents follow document order; removed ones
    /// carry their last known fields.
    pub fn diff_against(&self, previous: &DocumentIndex) -> Vec<DocumentChange> {
        let mut changes = Vec::new();
        let mut present = BTreeSet::new();

        for doc in &self.documents {
            let kind = match previous.get(&doc.id) {
                None => Some(ChangeKind::Added),
                Some(fields) if *fields != doc.fields => Some(ChangeKind::Modified),
                Some(_) => None,
            };
            if let Some(kind) = kind {
                changes.push(DocumentChange {
                    kind,
                    document: doc.clone(),
                });
            }
            present.insert(doc.id.as_str());
        }

        for (id, fields) in previous {
            if !present.contains(id.as_str()) {
                changes.push(DocumentChange {
                    kind: ChangeKind::Removed,
                    document: Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    },
                });
            }
        }

        changes
    }
}

/// A raw snapshot stamped with its position in the subscription.
///
/// Versions start at 1 and increase by one per delivered snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSnapshot {
    pub version: u64,
    pub raw: RawSnapshot,
}

impl Ord for VersionedSnapshot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }
}

impl PartialOrd for VersionedSnapshot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<T> {
    pub id: String,
    pub data: T,
}

/// A decoded change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub record: Record<T>,
}

/// Typed view of one delivered snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub version: u64,
    /// Current full result set, in document order
    pub records: Vec<Record<T>>,
    /// Diff against the previous snapshot
    pub changes: Vec<Change<T>>,
}

impl<T> Snapshot<T> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: DeserializeOwned> Snapshot<T> {
    /// Decode a versioned raw snapshot.
    ///
    /// Documents that do not decode into `T` are skipped with a data-quality
    /// warning; they never fail the snapshot.
    pub fn decode(snapshot: &VersionedSnapshot, metrics: &EngineMetrics) -> Self {
        let records = snapshot
            .raw
            .documents
            .iter()
            .filter_map(|doc| decode_record(doc, metrics))
            .collect();

        let changes = snapshot
            .raw
            .changes
            .iter()
            .filter_map(|change| {
                decode_record(&change.document, metrics).map(|record| Change {
                    kind: change.kind,
                    record,
                })
            })
            .collect();

        Self {
            version: snapshot.version,
            records,
            changes,
        }
    }
}

fn decode_record<T: DeserializeOwned>(doc: &Document, metrics: &EngineMetrics) -> Option<Record<T>> {
    match serde_json::from_value::<T>(doc.fields.clone()) {
        Ok(data) => Some(Record {
            id: doc.id.clone(),
            data,
        }),
        Err(err) => {
            let warning = DataQualityWarning::Undecodable {
                record_id: doc.id.clone(),
                reason: err.to_string(),
            };
            metrics.record_malformed(&doc.id);
            warn!(record_id = %doc.id, %warning, "Skipping undecodable document");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use types::lap::LapDocument;

    fn doc(id: &str, fields: Value) -> Document {
        Document {
            id: id.to_string(),
            fields,
        }
    }

    #[test]
    fn test_versioned_snapshot_ordering() {
        let mut snapshots = vec![
            VersionedSnapshot { version: 3, raw: RawSnapshot::default() },
            VersionedSnapshot { version: 1, raw: RawSnapshot::default() },
            VersionedSnapshot { version: 2, raw: RawSnapshot::default() },
        ];
        snapshots.sort();

        let versions: Vec<u64> = snapshots.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_skips_undecodable_documents() {
        let metrics = EngineMetrics::new();
        let raw = RawSnapshot {
            documents: vec![
                doc("l1", json!({ "runnerId": "r1", "timestamp": "2023-09-23T10:00:00Z" })),
                doc("l2", json!({ "runnerId": 42 })),
                doc("l3", json!({ "runnerId": "r2", "timestamp": "2023-09-23T10:05:00Z" })),
            ],
            changes: vec![DocumentChange {
                kind: ChangeKind::Added,
                document: doc("l3", json!({ "runnerId": "r2", "timestamp": "2023-09-23T10:05:00Z" })),
            }],
        };

        let snapshot: Snapshot<LapDocument> =
            Snapshot::decode(&VersionedSnapshot { version: 7, raw }, &metrics);

        assert_eq!(snapshot.version, 7);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.records[0].id, "l1");
        assert_eq!(snapshot.records[1].id, "l3");
        assert_eq!(snapshot.changes.len(), 1);
        assert_eq!(snapshot.changes[0].kind, ChangeKind::Added);
        assert_eq!(metrics.malformed_records(), 1);
    }

    #[test]
    fn test_diff_against_previous_delivery() {
        let previous: DocumentIndex = [
            ("l1".to_string(), json!({ "runnerId": "a" })),
            ("l2".to_string(), json!({ "runnerId": "a" })),
        ]
        .into_iter()
        .collect();
        let raw = RawSnapshot {
            documents: vec![
                doc("l1", json!({ "runnerId": "a" })),
                doc("l2", json!({ "runnerId": "b" })),
                doc("l3", json!({ "runnerId": "c" })),
            ],
            changes: Vec::new(),
        };

        let changes = raw.diff_against(&previous);
        let kinds: Vec<(ChangeKind, &str)> = changes
            .iter()
            .map(|c| (c.kind, c.document.id.as_str()))
            .collect();
        assert_eq!(kinds, vec![(ChangeKind::Modified, "l2"), (ChangeKind::Added, "l3")]);

        let gone = RawSnapshot::default().diff_against(&previous);
        assert_eq!(gone.len(), 2);
        assert!(gone.iter().all(|c| c.kind == ChangeKind::Removed));
        assert_eq!(gone[0].document.fields, json!({ "runnerId": "a" }));

        assert!(raw.diff_against(&raw.index()).is_empty());
    }

    #[test]
    fn test_change_kind_serialization() {
        assert_eq!(serde_json::to_string(&ChangeKind::Removed).unwrap(), "\"removed\"");
    }
}
