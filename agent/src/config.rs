//! Configuration for the relay agent
//!
//! Values come from command-line flags, environment variables, or an
//! optional `relay-agent.yml`. Flags and environment win over the file.

use anyhow::{Context, Result};
use relay_agent_shared::Error;
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::endpoint::{local_target, RelayEndpoint};
use crate::forwarder::REQUEST_TIMEOUT;
use crate::manager::{RetryPolicy, DIAL_RETRY_DELAY, RECONNECT_DELAY};
use crate::session::IDLE_TIMEOUT;
use crate::tunnel::auth_value;

/// Unvalidated settings, as read from a file or assembled from flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    /// Relay server address
    pub server: Option<String>,

    /// Application ID
    #[serde(alias = "app_id")]
    pub app: Option<String>,

    /// Relay authorization token
    pub token: Option<String>,

    /// Local target service port
    pub port: Option<u16>,

    pub idle_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub dial_retry_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
}

/// Validated agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: RelayEndpoint,
    pub app_id: String,
    pub token: String,
    pub port: u16,
    pub idle_timeout: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl RawConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: RawConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<PathBuf> {
        let candidates = [
            "relay-agent.yml",
            "relay-agent.yaml",
            ".relay-agent.yml",
            ".relay-agent.yaml",
        ];

        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }

    /// Fill every unset value from `fallback`.
    pub fn or(self, fallback: RawConfig) -> RawConfig {
        RawConfig {
            server: non_empty(self.server).or(fallback.server),
            app: non_empty(self.app).or(fallback.app),
            token: non_empty(self.token).or(fallback.token),
            port: self.port.or(fallback.port),
            idle_timeout_secs: self.idle_timeout_secs.or(fallback.idle_timeout_secs),
            request_timeout_secs: self.request_timeout_secs.or(fallback.request_timeout_secs),
            dial_retry_secs: self.dial_retry_secs.or(fallback.dial_retry_secs),
            reconnect_delay_secs: self.reconnect_delay_secs.or(fallback.reconnect_delay_secs),
        }
    }

    /// Check required options and apply defaults.
    pub fn resolve(self) -> relay_agent_shared::Result<AgentConfig> {
        let server = required(self.server, "server address", "-s or --server", "the relay server address")?;
        let app_id = required(self.app, "application ID", "-a or --app", "the application ID")?;
        let token = required(self.token, "authorization token", "-t or --token", "the authorization token")?;
        if auth_value(&token).is_err() {
            return Err(Error::Config(
                "authorization token contains characters that are not allowed in a header".into(),
            ));
        }
        let port = match self.port {
            None => return Err(missing("target service port", "-p or --port", "the target service port")),
            Some(0) => return Err(Error::Config("target service port must be between 1 and 65535".into())),
            Some(port) => port,
        };

        Ok(AgentConfig {
            endpoint: RelayEndpoint::parse(&server)?,
            app_id,
            token,
            port,
            idle_timeout: secs_or(self.idle_timeout_secs, IDLE_TIMEOUT),
            request_timeout: secs_or(self.request_timeout_secs, REQUEST_TIMEOUT),
            retry: RetryPolicy {
                dial_retry: secs_or(self.dial_retry_secs, DIAL_RETRY_DELAY),
                reconnect: secs_or(self.reconnect_delay_secs, RECONNECT_DELAY),
            },
        })
    }
}

impl AgentConfig {
    pub fn access_url(&self) -> String {
        self.endpoint.access_url(&self.app_id)
    }

    pub fn target_base(&self) -> relay_agent_shared::Result<Url> {
        local_target(self.port)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, what: &str, flags: &str, purpose: &str) -> relay_agent_shared::Result<String> {
    non_empty(value).ok_or_else(|| missing(what, flags, purpose))
}

fn missing(what: &str, flags: &str, purpose: &str) -> Error {
    Error::Config(format!("{} is required. Use {} to specify {}", what, flags, purpose))
}

fn secs_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}
