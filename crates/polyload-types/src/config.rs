//! Client configuration.
//!
//! Resolution order: built-in defaults, then a JSON config file (if given),
//! then the `WS_PROVIDER` environment variable, then command-line flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Confirmation, PolyloadError, constants};

/// Settings for `ChainSyncWatcher::wait_for_drain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Blocks with at most this many extrinsics count as idle.
    pub housekeeping_extrinsics: usize,
    /// Give up after this long. `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            housekeeping_extrinsics: constants::DEFAULT_HOUSEKEEPING_EXTRINSICS,
            timeout_ms: None,
        }
    }
}

/// Everything needed to talk to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// JSON-RPC WebSocket endpoint.
    pub endpoint: String,
    /// Confirmation depth for tracked submissions.
    pub confirmation: Confirmation,
    /// Fire-and-forget: broadcast without tracking inclusion.
    pub fast: bool,
    pub drain: DrainConfig,
    /// Per-request timeout. `None` waits forever.
    pub request_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: constants::DEFAULT_ENDPOINT.to_string(),
            confirmation: Confirmation::InBlock,
            fast: false,
            drain: DrainConfig::default(),
            request_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Defaults with the endpoint taken from `WS_PROVIDER` when set.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_endpoint_override(std::env::var(constants::ENDPOINT_ENV_VAR).ok())
    }

    /// Replace the endpoint if `endpoint` is a non-empty value.
    #[must_use]
    pub fn with_endpoint_override(mut self, endpoint: Option<String>) -> Self {
        if let Some(ep) = endpoint.filter(|e| !e.trim().is_empty()) {
            self.endpoint = ep.trim().to_string();
        }
        self
    }

    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| PolyloadError::Configuration(format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check the endpoint scheme and numeric limits.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(PolyloadError::InvalidEndpoint(format!(
                "{} (expected ws:// or wss://)",
                self.endpoint
            )));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(PolyloadError::Configuration(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.drain.timeout_ms == Some(0) {
            return Err(PolyloadError::Configuration(
                "drain.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
