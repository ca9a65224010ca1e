//! Runner profile types
//!
//! A runner is either a student (with class and house) or a staff member.
//! The stored document shape is `RunnerDocument`; the rest of the system
//! works with the typed `Runner`.

use crate::ids::RunnerId;
use serde::{Deserialize, Serialize};

/// Group label used for staff wherever a house or class is expected.
pub const STAFF_GROUP: &str = "external/staff";

/// Runner type as stored in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerType {
    Student,
    Staff,
}

/// Type-specific runner attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunnerKind {
    /// A student belongs to exactly one class and one house
    Student { class: String, house: String },
    /// Staff and external participants carry no class or house
    Staff,
}

impl RunnerKind {
    pub fn runner_type(&self) -> RunnerType {
        match self {
            RunnerKind::Student { .. } => RunnerType::Student,
            RunnerKind::Staff => RunnerType::Staff,
        }
    }
}

/// A registered event participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runner {
    pub id: RunnerId,
    pub name: String,
    /// Start number, unique and assigned sequentially at creation
    pub number: u32,
    pub kind: RunnerKind,
    /// Target lap count, if the runner set one
    pub goal: Option<u32>,
    pub email: Option<String>,
}

impl Runner {
    /// Build a runner from its stored document.
    ///
    /// Student fields missing from the document default to empty strings.
    pub fn from_document(id: RunnerId, doc: RunnerDocument) -> Self {
        let kind = match doc.runner_type {
            RunnerType::Student => RunnerKind::Student {
                class: doc.class.unwrap_or_default(),
                house: doc.house.unwrap_or_default(),
            },
            RunnerType::Staff => RunnerKind::Staff,
        };

        Self {
            id,
            name: doc.name,
            number: doc.number,
            kind,
            goal: doc.goal.filter(|goal| *goal > 0),
            email: doc.email,
        }
    }

    /// Convert back into the stored document shape
    pub fn to_document(&self) -> RunnerDocument {
        let (class, house) = match &self.kind {
            RunnerKind::Student { class, house } => (Some(class.clone()), Some(house.clone())),
            RunnerKind::Staff => (None, None),
        };

        RunnerDocument {
            name: self.name.clone(),
            number: self.number,
            runner_type: self.kind.runner_type(),
            class,
            house,
            goal: self.goal,
            email: self.email.clone(),
        }
    }

    pub fn is_student(&self) -> bool {
        matches!(self.kind, RunnerKind::Student { .. })
    }

    /// Class of a student, `None` for staff
    pub fn class(&self) -> Option<&str> {
        match &self.kind {
            RunnerKind::Student { class, .. } => Some(class),
            RunnerKind::Staff => None,
        }
    }

    /// House of a student, `None` for staff
    pub fn house(&self) -> Option<&str> {
        match &self.kind {
            RunnerKind::Student { house, .. } => Some(house),
            RunnerKind::Staff => None,
        }
    }

    /// House label for grouping; staff fall under [`STAFF_GROUP`]
    pub fn house_group(&self) -> &str {
        self.house().unwrap_or(STAFF_GROUP)
    }

    /// Class label for grouping; staff fall under [`STAFF_GROUP`]
    pub fn class_group(&self) -> &str {
        self.class().unwrap_or(STAFF_GROUP)
    }
}

/// Runner document as stored under the runners collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerDocument {
    pub name: String,
    #[serde(default)]
    pub number: u32,
    #[serde(rename = "type")]
    pub runner_type: RunnerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub house: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl RunnerDocument {
    /// Document for a walk-in participant registered at the assistant desk
    pub fn staff(name: impl Into<String>, number: u32) -> Self {
        Self {
            name: name.into(),
            number,
            runner_type: RunnerType::Staff,
            class: None,
            house: None,
            goal: None,
            email: None,
        }
    }
}
