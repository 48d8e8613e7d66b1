//! Connector backed by an HTTP service.
//!
//! Endpoints (relative to the configured base URL):
//! - `POST /capabilities`
//! - `POST /actions/{action_id}`
//! - `POST /oauth/token`
//! - `POST /compensate` (404 or 501 means "no compensating action")
//!
//! Auth: `Authorization: Bearer <access token>` from the call context. The
//! token exchange has no connection yet and uses the optional service token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{ActionContext, ActionOutcome, ActionRequest, CapabilitySet, Connector, TokenGrant};
use crate::domain::Snapshot;

/// Connector that forwards calls to an HTTP endpoint
pub struct HttpConnector {
    provider: String,
    base_url: String,
    service_token: Option<String>,
    client: reqwest::Client,
}

impl HttpConnector {
    /// Create a new connector for `provider` at `base_url`
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_token: None,
            client: reqwest::Client::new(),
        }
    }

    /// Authenticate token exchange with a service credential
    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }

    /// Build an endpoint URL
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        access_token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to reach connector '{}' at {}", self.provider, path))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        access_token: Option<&str>,
    ) -> Result<T> {
        let response = self.post(path, body, access_token).await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Connector '{}' error ({}): {}", self.provider, status, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse connector '{}' response", self.provider))
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn discover_capabilities(&self, access_token: &str) -> Result<CapabilitySet> {
        self.post_json("capabilities", &json!({}), Some(access_token))
            .await
    }

    async fn execute_action(
        &self,
        action_id: &str,
        request: ActionRequest,
    ) -> Result<ActionOutcome> {
        let body = json!({
            "input": request.input,
            "dry_run": request.dry_run,
            "context": {
                "connection_id": request.context.connection_id,
                "auth_level": request.context.auth_level,
                "trace_id": request.context.trace_id,
            },
        });

        self.post_json(
            &format!("actions/{}", action_id),
            &body,
            Some(&request.context.access_token),
        )
        .await
    }

    async fn exchange_token(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let body = json!({ "code": code, "redirect_uri": redirect_uri });
        self.post_json("oauth/token", &body, self.service_token.as_deref())
            .await
    }

    async fn compensate(
        &self,
        context: &ActionContext,
        snapshot: &Snapshot,
    ) -> Result<Option<serde_json::Value>> {
        let body = json!({
            "snapshot_id": snapshot.id,
            "scope": snapshot.scope,
            "target": snapshot.target,
            "before_state": snapshot.before_state,
            "trace_id": context.trace_id,
        });

        let response = self
            .post("compensate", &body, Some(&context.access_token))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NOT_IMPLEMENTED {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Connector '{}' compensate error ({}): {}",
                self.provider,
                status,
                text
            );
        }

        let value = response
            .json()
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok(Some(value))
    }
}
