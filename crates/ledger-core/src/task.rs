use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Status;

/// Free-form annotations attached to a task (source topic, subscription
/// name, ...). Insertion order is never meaningful, so this is a
/// `BTreeMap` rather than a `HashMap` - deterministic iteration makes
/// tests and logs reproducible at no cost.
pub type Metadata = BTreeMap<String, String>;

/// The single mutable entity in the ledger. One record per logical work
/// item, unique by `task_id`.
///
/// Field names serialize to the camelCase wire names documented in the
/// persisted state layout; the BSON document stored in MongoDB matches
/// this shape exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// 24-hex-encoded object id. Stored as a string, not a BSON ObjectId,
    /// per the persisted state layout.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Business key; globally unique, backed by a unique index.
    pub task_id: String,

    /// Opaque work input.
    pub body: String,

    pub status: Status,

    /// Optimistic-concurrency token. Starts at 1, strictly increases on
    /// every write.
    pub version: i64,

    pub retry_count: u32,

    pub worker_pod_id: Option<String>,
    pub worker_node_id: Option<String>,

    #[serde(with = "bson_datetime_opt")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(with = "bson_datetime_opt")]
    pub locked_at: Option<DateTime<Utc>>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,

    #[serde(with = "bson_datetime_opt")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(with = "bson_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "bson_datetime_opt")]
    pub failed_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

/// `bson`'s own `chrono_datetime_as_bson_datetime` helper only covers
/// `DateTime<Utc>`, not `Option<DateTime<Utc>>` - this fills that gap the
/// same way, round-tripping through `bson::DateTime` so every timestamp
/// field is stored as a native BSON date rather than chrono's default
/// RFC-3339 string.
mod bson_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(bson::DateTime::from_chrono).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(value.map(|dt| dt.to_chrono()))
    }
}

impl Task {
    /// Build a fresh task the way the ingester does: a new work item with
    /// no owner yet, `version` at its starting value of 1.
    pub fn new(task_id: impl Into<String>, body: impl Into<String>, status: Status) -> Self {
        let now = Utc::now();

        Self {
            id: String::new(),
            task_id: task_id.into(),
            body: body.into(),
            status,
            version: 1,
            retry_count: 0,
            worker_pod_id: None,
            worker_node_id: None,
            last_heartbeat: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            error_message: None,
            metadata: Metadata::new(),
        }
    }

    /// Invariant 3: while assigned/running, ownership must be held; once
    /// requeued, all ownership witnesses must be cleared together.
    pub fn has_owner(&self) -> bool {
        self.worker_pod_id.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
