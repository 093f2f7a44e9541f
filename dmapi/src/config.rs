//! Client configuration resolved from the hosting process environment.

use crate::envelope::ProtocolVersion;
use crate::session::DEFAULT_PIPE_TIMEOUT_MS;
use std::path::PathBuf;
use tracing::warn;

pub const ENV_API_PATH: &str = crate::loader::ENV_API_PATH;
pub const ENV_PIPE: &str = "DM_PIPE";
pub const ENV_PIPE_TIMEOUT_MS: &str = "DM_PIPE_TIMEOUT_MS";
pub const ENV_PROTOCOL: &str = "DM_PROTOCOL";
pub const ENV_APP_ID: &str = "DM_APP_ID";
pub const ENV_PUBLIC_KEY: &str = "DM_PUBLIC_KEY";
pub const ENV_LAUNCHER_ENDPOINT: &str = "DM_LAUNCHER_ENDPOINT";
pub const ENV_LAUNCHER_TOKEN: &str = "DM_LAUNCHER_TOKEN";

/// Configuration snapshot for a [`DmApi`](crate::DmApi).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkConfig {
    /// Explicit native library path; `None` falls back to the default name.
    pub library_path: Option<PathBuf>,
    /// Pipe identifier of the background service. `None` makes every
    /// stateful call report the channel as unavailable.
    pub pipe: Option<String>,
    /// Connect timeout for the session channel.
    pub pipe_timeout_ms: u32,
    /// Wire shape of stateful responses.
    pub protocol: ProtocolVersion,
    /// Application id used by dev-license checks.
    pub app_id: Option<String>,
    /// Public key used by dev-license checks.
    pub public_key: Option<String>,
    /// Launcher endpoint; together with the token it bypasses license checks.
    pub launcher_endpoint: Option<String>,
    pub launcher_token: Option<String>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            pipe: None,
            pipe_timeout_ms: DEFAULT_PIPE_TIMEOUT_MS,
            protocol: ProtocolVersion::default(),
            app_id: None,
            public_key: None,
            launcher_endpoint: None,
            launcher_token: None,
        }
    }
}

impl SdkConfig {
    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let pipe_timeout_ms = match get(ENV_PIPE_TIMEOUT_MS) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "Ignoring invalid {}", ENV_PIPE_TIMEOUT_MS);
                DEFAULT_PIPE_TIMEOUT_MS
            }),
            None => DEFAULT_PIPE_TIMEOUT_MS,
        };
        let protocol = match get(ENV_PROTOCOL) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("Ignoring {}: {}", ENV_PROTOCOL, e);
                ProtocolVersion::default()
            }),
            None => ProtocolVersion::default(),
        };

        Self {
            library_path: get(ENV_API_PATH).map(PathBuf::from),
            pipe: get(ENV_PIPE),
            pipe_timeout_ms,
            protocol,
            app_id: get(ENV_APP_ID),
            public_key: get(ENV_PUBLIC_KEY),
            launcher_endpoint: get(ENV_LAUNCHER_ENDPOINT),
            launcher_token: get(ENV_LAUNCHER_TOKEN),
        }
    }

    /// Whether the session channel can ever be opened with this config.
    pub fn channel_available(&self) -> bool {
        self.pipe.is_some()
    }

    /// Whether both launcher variables are present.
    pub fn launched_by_launcher(&self) -> bool {
        self.launcher_endpoint.is_some() && self.launcher_token.is_some()
    }
}
