//! Client configuration loaded from environment variables.
//!
//! Every setting has a default that points at a local development backend,
//! so the client starts with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use parley_net::HubConfig;
use parley_shared::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNECT_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT,
};
use parley_shared::types::{Role, UserId};

/// Where conversation state is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Per-user file under the platform data directory.
    Default,
    /// Explicit directory; the per-user file name is appended.
    Dir(PathBuf),
    /// In-memory only.
    Disabled,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the chat REST API.
    /// Env: `PARLEY_API_URL`
    /// Default: `http://localhost:5000/api`
    pub api_url: String,

    /// Hub endpoint. `http(s)` schemes are accepted and rewritten.
    /// Env: `PARLEY_HUB_URL`
    /// Default: `ws://localhost:5000/chatHub`
    pub hub_url: String,

    /// Bearer token for both REST and hub.
    /// Env: `PARLEY_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// Env: `PARLEY_CONNECT_TIMEOUT_SECS`
    pub connect_timeout: Duration,

    /// Env: `PARLEY_REQUEST_TIMEOUT_SECS`
    pub request_timeout: Duration,

    /// Env: `PARLEY_MAX_CONNECT_ATTEMPTS`
    pub max_connect_attempts: u32,

    /// Env: `PARLEY_DB_PATH` (a directory, or `none`)
    pub database: DatabaseLocation,

    /// Also push sent messages over the hub after the REST call succeeds.
    /// Env: `PARLEY_REALTIME_PUSH` (true/false)
    /// Default: `true`
    pub realtime_push: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            hub_url: "ws://localhost:5000/chatHub".to_string(),
            access_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            database: DatabaseLocation::Default,
            realtime_push: true,
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ChatConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLEY_API_URL") {
            config.api_url = url;
        }

        if let Some(url) = lookup("PARLEY_HUB_URL") {
            config.hub_url = url;
        }

        if let Some(token) = lookup("PARLEY_ACCESS_TOKEN") {
            if !token.is_empty() {
                config.access_token = Some(token);
            }
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "PARLEY_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "PARLEY_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<u32, _>(&lookup, "PARLEY_MAX_CONNECT_ATTEMPTS") {
            if n == 0 {
                tracing::warn!("PARLEY_MAX_CONNECT_ATTEMPTS must be at least 1, using default");
            } else {
                config.max_connect_attempts = n;
            }
        }

        if let Some(path) = lookup("PARLEY_DB_PATH") {
            config.database = if path.eq_ignore_ascii_case("none") {
                DatabaseLocation::Disabled
            } else {
                DatabaseLocation::Dir(PathBuf::from(path))
            };
        }

        if let Some(val) = lookup("PARLEY_REALTIME_PUSH") {
            config.realtime_push = val != "false" && val != "0";
        }

        config
    }

    /// Timing knobs for the connection actor. Retry schedule constants are
    /// not configurable.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            connect_timeout: self.connect_timeout,
            max_connect_attempts: self.max_connect_attempts,
            ..HubConfig::default()
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// Who is signed in. Comes from the host application's auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub role: Role,
}

impl SessionIdentity {
    pub fn new(user_id: impl Into<UserId>, claims: &[&str]) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::from_claims(claims),
        }
    }

    /// Env: `PARLEY_USER_ID` (required), `PARLEY_ROLES` (comma-separated).
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_id = lookup("PARLEY_USER_ID").filter(|id| !id.trim().is_empty())?;
        let roles = lookup("PARLEY_ROLES").unwrap_or_default();
        let claims: Vec<&str> = roles
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        Some(Self {
            user_id: UserId::new(user_id.trim()),
            role: Role::from_claims(&claims),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ChatConfig::from_lookup(lookup(&[]));
        assert_eq!(config.api_url, "http://localhost:5000/api");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_connect_attempts, 5);
        assert_eq!(config.database, DatabaseLocation::Default);
        assert!(config.realtime_push);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ChatConfig::from_lookup(lookup(&[
            ("PARLEY_API_URL", "https://shop.example/api"),
            ("PARLEY_ACCESS_TOKEN", "jwt"),
            ("PARLEY_CONNECT_TIMEOUT_SECS", "3"),
            ("PARLEY_MAX_CONNECT_ATTEMPTS", "2"),
            ("PARLEY_DB_PATH", "none"),
            ("PARLEY_REALTIME_PUSH", "0"),
        ]));
        assert_eq!(config.api_url, "https://shop.example/api");
        assert_eq!(config.access_token.as_deref(), Some("jwt"));
        assert_eq!(config.database, DatabaseLocation::Disabled);
        assert!(!config.realtime_push);

        let hub = config.hub_config();
        assert_eq!(hub.connect_timeout, Duration::from_secs(3));
        assert_eq!(hub.max_connect_attempts, 2);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = ChatConfig::from_lookup(lookup(&[
            ("PARLEY_REQUEST_TIMEOUT_SECS", "soon"),
            ("PARLEY_MAX_CONNECT_ATTEMPTS", "0"),
        ]));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.max_connect_attempts, DEFAULT_MAX_CONNECT_ATTEMPTS);
    }

    #[test]
    fn test_identity_from_claims() {
        let id = SessionIdentity::from_lookup(lookup(&[
            ("PARLEY_USER_ID", "agent-7"),
            ("PARLEY_ROLES", "User, Support"),
        ]))
        .unwrap();
        assert_eq!(id.user_id, UserId::from("agent-7"));
        assert_eq!(id.role, Role::Support);

        assert!(SessionIdentity::from_lookup(lookup(&[("PARLEY_ROLES", "Admin")])).is_none());
    }
}
