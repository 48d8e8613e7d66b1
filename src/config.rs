//! Configuration for plangate.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PLANGATE_HOME, PLANGATE_DEFAULT_BRANCH)
//! 2. Config file (.plangate/config.yaml)
//! 3. Defaults (~/.plangate)
//!
//! Config file discovery:
//! - Searches current directory and parents for .plangate/config.yaml
//! - `paths.home` is relative to the .plangate/ directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::connectors::{Connector, ConnectorRegistry, HttpConnector, ProcessConnector};
use crate::core::ExecutionPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub execution: Option<ExecutionPolicy>,
    #[serde(default)]
    pub connectors: HashMap<String, ConnectorConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the .plangate/ directory)
    pub home: Option<String>,
}

/// How to reach the connector for one provider
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// Spawn an executable per call
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// POST to an HTTP service
    Http {
        endpoint: String,
        /// Environment variable holding the service token for token exchange
        #[serde(default)]
        token_env: Option<String>,
    },
}

impl ConnectorConfig {
    /// Instantiate the connector for `provider`
    pub fn build(&self, provider: &str) -> Arc<dyn Connector> {
        match self {
            ConnectorConfig::Process { command, args } => {
                Arc::new(ProcessConnector::new(provider, command.clone()).with_args(args.clone()))
            }
            ConnectorConfig::Http {
                endpoint,
                token_env,
            } => {
                let mut connector = HttpConnector::new(provider, endpoint.clone());
                if let Some(token) = token_env.as_ref().and_then(|var| std::env::var(var).ok()) {
                    connector = connector.with_service_token(token);
                }
                Arc::new(connector)
            }
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to plangate home
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Execution settings
    pub execution: ExecutionPolicy,
    /// Connector per provider id
    pub connectors: HashMap<String, ConnectorConfig>,
}

impl ResolvedConfig {
    /// Directory holding the JSONL store
    pub fn state_dir(&self) -> PathBuf {
        self.home.join("state")
    }

    /// Build a connector registry from the configured connectors
    pub fn registry(&self) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        for (provider, connector) in &self.connectors {
            registry.register(connector.build(provider));
        }
        registry
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".plangate").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = find_config_file();
    let parsed = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    resolve(config_file, parsed)
}

/// Merge a parsed config file with environment and defaults
fn resolve(config_file: Option<PathBuf>, parsed: Option<ConfigFile>) -> Result<ResolvedConfig> {
    let home = if let Ok(env_home) = std::env::var("PLANGATE_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home_path)) = (
        config_file.as_ref(),
        parsed.as_ref().and_then(|c| c.paths.home.as_ref()),
    ) {
        let plangate_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(plangate_dir, home_path)
    } else {
        dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".plangate")
    };

    let (execution, connectors) = match parsed {
        Some(config) => (config.execution.unwrap_or_default(), config.connectors),
        None => (ExecutionPolicy::default(), HashMap::new()),
    };

    let mut execution = execution;
    if let Ok(branch) = std::env::var("PLANGATE_DEFAULT_BRANCH") {
        execution.default_branch = branch;
    }

    Ok(ResolvedConfig {
        home,
        config_file,
        execution,
        connectors,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the plangate home directory.
pub fn plangate_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the state directory ($PLANGATE_HOME/state)
pub fn state_dir() -> Result<PathBuf> {
    Ok(config()?.state_dir())
}
