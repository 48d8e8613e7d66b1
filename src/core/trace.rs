//! Trace identifiers.

use chrono::Utc;
use uuid::Uuid;

/// Generate a trace id: `trc-{unix millis, hex}-{8 random hex chars}`
pub fn generate_trace_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("trc-{:x}-{}", millis, &random[..8])
}
