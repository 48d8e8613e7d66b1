//! Before-state snapshots.
//!
//! The checksum is a SHA-256 over the canonical JSON encoding of the
//! before-state (object keys sorted, no whitespace). It must recompute
//! identically from the stored document alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Immutable capture of state-before for a scope/target pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier for this snapshot
    pub id: Uuid,

    /// The run this snapshot was captured for
    pub run_id: Uuid,

    /// Connection used for the run
    pub connection_id: String,

    /// Provider identifier of the connection
    pub scope: String,

    /// Comma-joined resource names
    pub target: String,

    /// State before execution
    pub before_state: Value,

    /// State after rollback or mutation, if captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<Value>,

    /// Hex SHA-256 of the canonical before-state
    pub checksum: String,

    /// When the snapshot was captured
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot, computing the checksum from `before_state`
    pub fn new(
        run_id: Uuid,
        connection_id: impl Into<String>,
        scope: impl Into<String>,
        target: impl Into<String>,
        before_state: Value,
    ) -> Self {
        let checksum = checksum(&before_state);
        Self {
            id: Uuid::new_v4(),
            run_id,
            connection_id: connection_id.into(),
            scope: scope.into(),
            target: target.into(),
            before_state,
            after_state: None,
            checksum,
            created_at: Utc::now(),
        }
    }

    /// Recompute the checksum and compare with the stored one
    pub fn verify(&self) -> bool {
        checksum(&self.before_state) == self.checksum
    }
}

/// Hex SHA-256 of the canonical encoding of `value`
pub fn checksum(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize with recursively sorted object keys
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
