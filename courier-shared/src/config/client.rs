use std::{env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use super::{ConfigError, read_config_file};

/// Reconnect schedule for the persistent connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 2_000,
            max_delay_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given zero-based attempt, doubling up to the cap.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Settings for the client transport adapter.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Base `http(s)://` address of the server.
    pub server_url: String,
    /// Bearer credential presented on the WebSocket handshake and REST calls.
    pub token: Option<String>,
    pub ack_timeout_ms: u64,
    pub grace_delay_ms: u64,
    pub connect_error_grace_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080/".to_string(),
            token: None,
            ack_timeout_ms: 5_000,
            grace_delay_ms: 3_000,
            connect_error_grace_ms: 5_000,
            poll_interval_ms: 3_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    #[must_use]
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    #[must_use]
    pub fn connect_error_grace(&self) -> Duration {
        Duration::from_millis(self.connect_error_grace_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// # Errors
    /// Returns [`url::ParseError`] when `server_url` is not an absolute URL.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.server_url)
    }

    /// `ws://` or `wss://` address of the WebSocket endpoint.
    ///
    /// # Errors
    /// Returns [`url::ParseError`] when `server_url` is not an absolute URL.
    pub fn websocket_url(&self) -> Result<Url, url::ParseError> {
        let mut url = self.base_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always an allowed scheme change.
        let _ = url.set_scheme(scheme);
        url.set_path("/api/ws");
        Ok(url)
    }

    /// Resolves `path` (e.g. `api/messages`) against the server URL.
    ///
    /// # Errors
    /// Returns [`url::ParseError`] when either part is malformed.
    pub fn api_url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url()?.join(path)
    }

    /// Loads client settings from an optional file, then `COURIER_SERVER_URL`
    /// and `COURIER_TOKEN`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on unreadable files or malformed variables.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| env::var(key).ok())
    }

    /// Same as [`ClientConfig::load`] with an injectable variable lookup.
    ///
    /// # Errors
    /// See [`ClientConfig::load`].
    pub fn load_with_env<F>(config_path: Option<PathBuf>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match config_path {
            Some(path) => read_config_file::<ClientConfig>(&path)?,
            None => ClientConfig::default(),
        };

        if let Some(raw) = lookup("COURIER_SERVER_URL") {
            if Url::parse(&raw).is_err() {
                return Err(ConfigError::InvalidEnv {
                    key: "COURIER_SERVER_URL",
                    value: raw,
                    reason: "must be an absolute http(s) URL",
                });
            }
            config.server_url = raw;
        }
        if let Some(token) = lookup("COURIER_TOKEN") {
            config.token = Some(token);
        }

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// # Errors
    /// Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match self.base_url() {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(format!(
                "server_url must use http or https, got '{}'",
                url.scheme()
            )),
            Err(err) => errors.push(format!("server_url is not a valid URL: {err}")),
        }
        if self.ack_timeout_ms == 0 {
            errors.push("ack_timeout_ms must be greater than 0.".to_string());
        }
        if self.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
