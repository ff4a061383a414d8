//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero configuration
//! against a local development server.

use std::path::PathBuf;
use std::time::Duration;

use parley_net::ConnectionConfig;
use parley_shared::constants::{
    DEFAULT_API_URL, DEFAULT_SOCKET_URL, MESSAGE_PAGE_SIZE, RECONNECT_ATTEMPTS, RECONNECT_DELAY,
    REQUEST_TIMEOUT,
};
use parley_store::StoreConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// REST base URL.
    /// Env: `PARLEY_API_URL`
    pub api_url: String,

    /// Live connection URL.
    /// Env: `PARLEY_SOCKET_URL`
    pub socket_url: String,

    /// Per-call REST timeout.
    /// Env: `PARLEY_REQUEST_TIMEOUT_SECS`
    pub request_timeout: Duration,

    /// Env: `PARLEY_RECONNECT_ATTEMPTS`
    pub reconnection_attempts: u32,

    /// Env: `PARLEY_RECONNECT_DELAY_MS`
    pub reconnection_delay: Duration,

    /// Messages per history page.
    /// Env: `PARLEY_PAGE_SIZE`
    pub page_size: u32,

    /// Where the credential is persisted. `None` uses the platform data
    /// directory.
    /// Env: `PARLEY_CREDENTIAL_PATH`
    pub credential_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            reconnection_attempts: RECONNECT_ATTEMPTS,
            reconnection_delay: RECONNECT_DELAY,
            page_size: MESSAGE_PAGE_SIZE,
            credential_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLEY_API_URL").filter(|v| !v.is_empty()) {
            config.api_url = url;
        }

        if let Some(url) = lookup("PARLEY_SOCKET_URL").filter(|v| !v.is_empty()) {
            config.socket_url = url;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PARLEY_REQUEST_TIMEOUT_SECS") {
            if secs > 0 {
                config.request_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("PARLEY_REQUEST_TIMEOUT_SECS must be positive, using default");
            }
        }

        if let Some(attempts) = parse_var::<u32>(&lookup, "PARLEY_RECONNECT_ATTEMPTS") {
            config.reconnection_attempts = attempts;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PARLEY_RECONNECT_DELAY_MS") {
            config.reconnection_delay = Duration::from_millis(ms);
        }

        if let Some(size) = parse_var::<u32>(&lookup, "PARLEY_PAGE_SIZE") {
            if size > 0 {
                config.page_size = size;
            } else {
                tracing::warn!("PARLEY_PAGE_SIZE must be positive, using default");
            }
        }

        if let Some(path) = lookup("PARLEY_CREDENTIAL_PATH").filter(|v| !v.is_empty()) {
            config.credential_path = Some(PathBuf::from(path));
        }

        config
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            page_size: self.page_size,
            request_timeout: self.request_timeout,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.socket_url.clone(),
            reconnection_attempts: self.reconnection_attempts,
            reconnection_delay: self.reconnection_delay,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let value = lookup(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.api_url, "http://localhost:5000/api");
        assert_eq!(config.socket_url, "ws://localhost:5000/ws");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.reconnection_attempts, 5);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.credential_path, None);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("PARLEY_API_URL", "https://chat.example/api"),
            ("PARLEY_RECONNECT_DELAY_MS", "250"),
            ("PARLEY_PAGE_SIZE", "20"),
            ("PARLEY_CREDENTIAL_PATH", "/tmp/cred"),
        ]);
        assert_eq!(config.api_url, "https://chat.example/api");
        assert_eq!(config.reconnection_delay, Duration::from_millis(250));
        assert_eq!(config.store_config().page_size, 20);
        assert_eq!(config.credential_path, Some(PathBuf::from("/tmp/cred")));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config(&[
            ("PARLEY_REQUEST_TIMEOUT_SECS", "soon"),
            ("PARLEY_PAGE_SIZE", "0"),
            ("PARLEY_RECONNECT_ATTEMPTS", "-3"),
        ]);
        assert_eq!(config, ClientConfig::default());
    }
}
