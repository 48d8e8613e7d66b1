//! Connections to external platforms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authorized link between the operator and one platform account
#[derive(Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Opaque connection identifier
    pub id: String,

    /// Provider identifier used to resolve the connector (e.g. "github")
    pub provider: String,

    /// Granted authorization level
    #[serde(default)]
    pub auth_level: AuthLevel,

    /// Access token passed to the connector on every call
    #[serde(default)]
    pub access_token: String,

    /// When the connection was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        auth_level: AuthLevel,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            auth_level,
            access_token: access_token.into(),
            created_at: Utc::now(),
        }
    }
}

// Tokens must never reach logs.
impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("auth_level", &self.auth_level)
            .field("access_token", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Authorization level granted to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    ReadOnly,
    ReadWrite,
    Admin,
}

impl Default for AuthLevel {
    fn default() -> Self {
        Self::ReadOnly
    }
}

impl std::str::FromStr for AuthLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_only" | "read-only" => Ok(Self::ReadOnly),
            "read_write" | "read-write" => Ok(Self::ReadWrite),
            "admin" => Ok(Self::Admin),
            other => Err(format!("Unknown auth level: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let conn = Connection::new("c1", "github", AuthLevel::Admin, "ghp_secret");
        let debug = format!("{:?}", conn);

        assert!(!debug.contains("ghp_secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_auth_level_parsing() {
        assert_eq!("read-write".parse::<AuthLevel>().unwrap(), AuthLevel::ReadWrite);
        assert_eq!("admin".parse::<AuthLevel>().unwrap(), AuthLevel::Admin);
        assert!("root".parse::<AuthLevel>().is_err());
    }
}
