//! Task domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

/// Validate that a namespace is restricted to ASCII.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_ascii() {
        Ok(())
    } else {
        Err(Error::InvalidNamespace(namespace.to_string()))
    }
}

/// A task as submitted by a producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Generated on push when absent.
    pub id: Option<Uuid>,
    /// ASCII only. Empty means the queue's default namespace.
    pub namespace: String,
    /// Higher is more urgent.
    pub priority: i16,
    /// Opaque to the queue. `null` is stored as `{}`.
    pub payload: Value,
    /// The task is invisible to shift until this time. Absent means now.
    pub not_before: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)
    }
}

/// A stored task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskDetails {
    pub id: Uuid,
    pub namespace: String,
    pub priority: i16,
    pub payload: Value,
    pub not_before: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every nack.
    pub attempts: i32,
}

impl TaskDetails {
    /// Whether the task may be selected at `now`.
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }
}

/// Stored form of an absent `not_before`.
pub(crate) fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Stored form of a payload; `null` becomes an empty object.
pub(crate) fn normalize_payload(payload: Value) -> Value {
    match payload {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}
