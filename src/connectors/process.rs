//! Connector backed by an external executable.
//!
//! Each operation spawns `<command> <args...> <operation> [action]`, writes a
//! JSON envelope to stdin and parses JSON from stdout. The access token is
//! passed in the `PLANGATE_ACCESS_TOKEN` environment variable, never on the
//! command line.
//!
//! Operations: `capabilities`, `execute <action>`, `exchange-token`,
//! `compensate`. An executable that does not support `compensate` should exit
//! with code 3, which is reported as "no compensating action".

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ActionContext, ActionOutcome, ActionRequest, CapabilitySet, Connector, TokenGrant};
use crate::domain::Snapshot;

/// Exit code meaning "operation not supported"
const EXIT_UNSUPPORTED: i32 = 3;

/// Connector that delegates to a subprocess
pub struct ProcessConnector {
    /// Provider id this connector serves
    provider: String,

    /// Executable to spawn
    command: String,

    /// Arguments placed before the operation name
    args: Vec<String>,
}

impl ProcessConnector {
    /// Create a connector for `provider` that runs `command`
    pub fn new(provider: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Set leading arguments (builder style)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Run one operation, returning the exit code and stdout
    async fn invoke(
        &self,
        operation: &[&str],
        envelope: &serde_json::Value,
        access_token: Option<&str>,
    ) -> Result<(i32, String)> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .args(operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(token) = access_token {
            command.env("PLANGATE_ACCESS_TOKEN", token);
        }

        let mut child = command.spawn().with_context(|| {
            format!(
                "Failed to spawn connector process '{}' for provider '{}'",
                self.command, self.provider
            )
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = serde_json::to_vec(envelope).context("Failed to encode request")?;
            // A connector may exit without reading its input
            if let Err(e) = stdin.write_all(&body).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).context("Failed to write to connector stdin");
                }
            }
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for connector process '{}'", self.command))?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() && exit_code != EXIT_UNSUPPORTED {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Connector '{}' {} failed with exit code {}: {}",
                self.provider,
                operation.join(" "),
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout)
            .context("Connector output is not valid UTF-8")?;

        Ok((exit_code, stdout))
    }

    async fn invoke_json<T: DeserializeOwned>(
        &self,
        operation: &[&str],
        envelope: &serde_json::Value,
        access_token: Option<&str>,
    ) -> Result<T> {
        let (exit_code, stdout) = self.invoke(operation, envelope, access_token).await?;
        if exit_code == EXIT_UNSUPPORTED {
            anyhow::bail!(
                "Connector '{}' does not support '{}'",
                self.provider,
                operation.join(" ")
            );
        }

        serde_json::from_str(stdout.trim()).with_context(|| {
            format!(
                "Connector '{}' returned invalid JSON for '{}'",
                self.provider,
                operation.join(" ")
            )
        })
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn discover_capabilities(&self, access_token: &str) -> Result<CapabilitySet> {
        self.invoke_json(&["capabilities"], &json!({}), Some(access_token))
            .await
    }

    async fn execute_action(
        &self,
        action_id: &str,
        request: ActionRequest,
    ) -> Result<ActionOutcome> {
        let envelope = json!({
            "action": action_id,
            "input": request.input,
            "dry_run": request.dry_run,
            "context": {
                "connection_id": request.context.connection_id,
                "auth_level": request.context.auth_level,
                "trace_id": request.context.trace_id,
            },
        });

        self.invoke_json(
            &["execute", action_id],
            &envelope,
            Some(&request.context.access_token),
        )
        .await
    }

    async fn exchange_token(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let envelope = json!({ "code": code, "redirect_uri": redirect_uri });
        self.invoke_json(&["exchange-token"], &envelope, None).await
    }

    async fn compensate(
        &self,
        context: &ActionContext,
        snapshot: &Snapshot,
    ) -> Result<Option<serde_json::Value>> {
        let envelope = json!({
            "snapshot_id": snapshot.id,
            "scope": snapshot.scope,
            "target": snapshot.target,
            "before_state": snapshot.before_state,
            "context": {
                "connection_id": context.connection_id,
                "trace_id": context.trace_id,
            },
        });

        let (exit_code, stdout) = self
            .invoke(&["compensate"], &envelope, Some(&context.access_token))
            .await?;
        if exit_code == EXIT_UNSUPPORTED {
            return Ok(None);
        }

        let body = stdout.trim();
        if body.is_empty() {
            return Ok(Some(serde_json::Value::Null));
        }

        let value = serde_json::from_str(body)
            .context("Connector returned invalid JSON for compensate")?;
        Ok(Some(value))
    }
}
