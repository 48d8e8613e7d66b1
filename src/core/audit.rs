//! Audit recorder.
//!
//! Appends audit events to the store and mirrors them to tracing under the
//! `audit` target.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::domain::AuditEvent;
use crate::store::Store;

/// Writes immutable audit events
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an event; a storage failure is returned to the caller
    pub async fn record(&self, event: AuditEvent) -> Result<()> {
        info!(
            target: "audit",
            action = %event.action,
            target_ref = %event.target,
            actor = %event.actor,
            result = ?event.result,
            trace_id = event.trace_id.as_deref().unwrap_or(""),
            "audit"
        );
        self.store.append_audit(&event).await
    }

    /// Append an event on a path that is already failing; errors are logged
    pub async fn record_best_effort(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.record(event).await {
            warn!(%action, error = %e, "Failed to record audit event");
        }
    }
}
