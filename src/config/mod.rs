//! Configuration loading for `scriptorium.json`
//!
//! A single optional JSON file at the managed repository root. Every key is
//! optional and falls back to a default, so an absent or empty file is a
//! valid configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "scriptorium.json";
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://127.0.0.1:8097";

const DEFAULT_ARCHITECT_MODEL: &str = "gpt-5";
const DEFAULT_CODING_MODEL: &str = "gpt-5-codex";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub models: ModelsConfig,
    pub reasoning_effort: ReasoningEffortConfig,
    pub endpoints: EndpointsConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelsConfig {
    pub architect: Option<String>,
    pub manager: Option<String>,
    pub coding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::Xhigh => "xhigh",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ReasoningEffortConfig {
    pub architect: Option<ReasoningEffort>,
    pub manager: Option<ReasoningEffort>,
    pub coding: Option<ReasoningEffort>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EndpointsConfig {
    pub local: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            local: DEFAULT_LOCAL_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    /// Agent CLI binary; resolved via PATH when not absolute.
    pub binary: String,
    pub max_attempts: u32,
    pub no_output_timeout_ms: u64,
    pub hard_timeout_ms: u64,
    /// 0 disables synthetic heartbeats.
    pub heartbeat_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "codex".to_string(),
            max_attempts: 2,
            no_output_timeout_ms: 120_000,
            hard_timeout_ms: 3_600_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl Config {
    /// Load from `<repo>/scriptorium.json`; a missing file yields defaults.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join(CONFIG_FILE);
        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<Config>(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.local_addr()?;
        Ok(())
    }

    /// Model name for the Architect planning runs.
    pub fn architect_model(&self) -> String {
        self.models
            .architect
            .clone()
            .unwrap_or_else(|| DEFAULT_ARCHITECT_MODEL.to_string())
    }

    /// Model name for the Manager ticket runs; falls back to the architect
    /// model when unset.
    pub fn manager_model(&self) -> String {
        self.models
            .manager
            .clone()
            .unwrap_or_else(|| self.architect_model())
    }

    /// Model name for coding-agent execution.
    pub fn coding_model(&self) -> String {
        self.models
            .coding
            .clone()
            .unwrap_or_else(|| DEFAULT_CODING_MODEL.to_string())
    }

    /// Socket address for the loopback tool server, validated from
    /// `endpoints.local`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let raw = &self.endpoints.local;
        let url = url::Url::parse(raw)
            .map_err(|e| Error::BadEndpointUrl(raw.clone(), e.to_string()))?;
        if url.scheme() != "http" {
            return Err(Error::BadEndpointUrl(
                raw.clone(),
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::BadEndpointUrl(raw.clone(), "missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::BadEndpointUrl(raw.clone(), "missing port".to_string()))?;
        format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| Error::BadEndpointUrl(raw.clone(), e.to_string()))
    }
}
