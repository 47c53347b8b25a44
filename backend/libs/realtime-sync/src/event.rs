//! Change notifications delivered by a push channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of row change reported by the backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOperation::Insert => write!(f, "insert"),
            ChangeOperation::Update => write!(f, "update"),
            ChangeOperation::Delete => write!(f, "delete"),
        }
    }
}

/// One change notification for a watched resource.
///
/// Wire shape: `{"operation":"update","resource":"clients","record":{"id":42,...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub resource: String,
    /// Affected row as the backend sent it (the old row for deletes)
    #[serde(default)]
    pub record: Value,
    /// Channel the event arrived on; filled in on delivery
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(operation: ChangeOperation, resource: impl Into<String>, record: Value) -> Self {
        Self {
            operation,
            resource: resource.into(),
            record,
            channel_id: String::new(),
            received_at: Utc::now(),
        }
    }

    pub fn insert(resource: impl Into<String>, record: Value) -> Self {
        Self::new(ChangeOperation::Insert, resource, record)
    }

    pub fn update(resource: impl Into<String>, record: Value) -> Self {
        Self::new(ChangeOperation::Update, resource, record)
    }

    pub fn delete(resource: impl Into<String>, record: Value) -> Self {
        Self::new(ChangeOperation::Delete, resource, record)
    }

    /// `id` of the affected record, if it has a string or numeric one
    pub fn record_id(&self) -> Option<String> {
        self.field("id")
    }

    /// A scalar field of the record rendered as a string
    pub fn field(&self, name: &str) -> Option<String> {
        match self.record.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
