//! Connector interfaces for external platforms.
//!
//! A connector adapts one platform (a source-control host, a ticketing
//! system, ...) to a uniform contract: capability discovery, action
//! execution and OAuth token exchange. The engine never talks to a platform
//! except through this trait.

pub mod http;
pub mod process;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AuthLevel, Connection, ExecutionMode, Snapshot};
use crate::error::{EngineError, EngineResult};

pub use http::HttpConnector;
pub use process::ProcessConnector;

/// What a connector can do with a given token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Actions the connector exposes
    #[serde(default)]
    pub actions: Vec<ActionDescriptor>,

    /// Scopes the token can read
    #[serde(default)]
    pub readable_scopes: Vec<String>,

    /// Scopes the token can write
    #[serde(default)]
    pub writable_scopes: Vec<String>,

    /// Scopes some actions need but the token lacks
    #[serde(default)]
    pub missing_scopes: Vec<String>,

    /// Connector-specific details
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One action a connector exposes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Whether the action mutates remote state
    #[serde(default)]
    pub mutating: bool,
}

/// Per-call context handed to a connector
#[derive(Clone, Serialize, Deserialize)]
pub struct ActionContext {
    pub connection_id: String,
    pub auth_level: AuthLevel,
    pub access_token: String,
    pub trace_id: String,
}

impl ActionContext {
    /// Build a context for a connection and trace
    pub fn for_connection(connection: &Connection, trace_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection.id.clone(),
            auth_level: connection.auth_level,
            access_token: connection.access_token.clone(),
            trace_id: trace_id.into(),
        }
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("connection_id", &self.connection_id)
            .field("auth_level", &self.auth_level)
            .field("access_token", &"<redacted>")
            .field("trace_id", &self.trace_id)
            .finish()
    }
}

/// A request to execute one action
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub context: ActionContext,
    pub input: serde_json::Value,

    /// Simulate only; the connector decides what that means per action
    pub dry_run: bool,
}

/// What a connector returns for a successful action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    #[serde(default)]
    pub output: serde_json::Value,

    #[serde(default)]
    pub evidence: serde_json::Value,

    /// Connector-side snapshot of the touched resource, if it took one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,

    /// How the connector would undo this action, if it knows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<serde_json::Value>,

    /// Mode the action actually ran in
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Why the action ran in a weaker mode than requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_reason: Option<String>,
}

impl ActionOutcome {
    /// Create an outcome with output and no evidence
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            evidence: serde_json::Value::Null,
            snapshot: None,
            rollback_plan: None,
            execution_mode: ExecutionMode::Auto,
            degrade_reason: None,
        }
    }

    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Tokens returned by an OAuth code exchange
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Trait for platform connectors
#[async_trait]
pub trait Connector: Send + Sync {
    /// Provider identifier this connector serves
    fn provider(&self) -> &str;

    /// Discover what the token allows
    async fn discover_capabilities(&self, access_token: &str) -> Result<CapabilitySet>;

    /// Execute one action; any failure is returned as an error
    async fn execute_action(&self, action_id: &str, request: ActionRequest)
        -> Result<ActionOutcome>;

    /// Exchange an OAuth authorization code for tokens
    async fn exchange_token(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant>;

    /// Revert remote state to a snapshot's before-state.
    ///
    /// Returns `Ok(None)` when the connector has no compensating action,
    /// in which case only the intent to restore is recorded.
    async fn compensate(
        &self,
        _context: &ActionContext,
        _snapshot: &Snapshot,
    ) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

/// Maps provider identifiers to connector instances.
///
/// Built at startup and passed into the engine; read-only afterwards.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its provider id, replacing any previous one
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.provider().to_string(), connector);
    }

    /// Register a connector (builder style)
    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(provider).cloned()
    }

    /// Resolve a connector or fail with `ConnectorNotFound`
    pub fn resolve(&self, provider: &str) -> EngineResult<Arc<dyn Connector>> {
        self.get(provider)
            .ok_or_else(|| EngineError::ConnectorNotFound {
                provider: provider.to_string(),
            })
    }

    /// Registered provider ids, sorted
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.connectors.keys().cloned().collect();
        providers.sort();
        providers
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullConnector;

    #[async_trait]
    impl Connector for NullConnector {
        fn provider(&self) -> &str {
            "null"
        }

        async fn discover_capabilities(&self, _access_token: &str) -> Result<CapabilitySet> {
            Ok(CapabilitySet::default())
        }

        async fn execute_action(
            &self,
            _action_id: &str,
            _request: ActionRequest,
        ) -> Result<ActionOutcome> {
            Ok(ActionOutcome::new(serde_json::Value::Null))
        }

        async fn exchange_token(&self, _code: &str, _redirect_uri: &str) -> Result<TokenGrant> {
            anyhow::bail!("not supported")
        }
    }

    #[test]
    fn test_registry_resolution() {
        let registry = ConnectorRegistry::new().with(Arc::new(NullConnector));

        assert!(registry.resolve("null").is_ok());
        assert_eq!(registry.providers(), vec!["null".to_string()]);

        match registry.resolve("github") {
            Err(EngineError::ConnectorNotFound { provider }) => assert_eq!(provider, "github"),
            _ => panic!("Expected ConnectorNotFound"),
        }
    }

    #[test]
    fn test_action_outcome_defaults() {
        let outcome: ActionOutcome = serde_json::from_str(r#"{"output": {"sha": "abc"}}"#).unwrap();

        assert_eq!(outcome.output["sha"], "abc");
        assert_eq!(outcome.execution_mode, ExecutionMode::Auto);
        assert!(outcome.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_default_compensate_is_unsupported() {
        let conn = Connection::new("c1", "null", AuthLevel::ReadOnly, "t");
        let ctx = ActionContext::for_connection(&conn, "trace");
        let snapshot = Snapshot::new(
            uuid::Uuid::new_v4(),
            "c1",
            "null",
            "",
            serde_json::json!({}),
        );

        let result = NullConnector.compensate(&ctx, &snapshot).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_context_debug_redacts_token() {
        let conn = Connection::new("c1", "null", AuthLevel::Admin, "super-secret");
        let ctx = ActionContext::for_connection(&conn, "trace");

        assert!(!format!("{:?}", ctx).contains("super-secret"));
    }
}
