use crate::error::{ProxyError, Result};
use crate::providers::{ProviderCredentials, TargetProvider, ANTHROPIC_BASE_URL};
use crate::routing::DEFAULT_LEAD_MARKER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub target: TargetConfig,
    #[serde(default)]
    pub passthrough: PassthroughConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub provider: TargetProvider,
    pub model: String,
    #[serde(default = "default_spoof_model")]
    pub spoof_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassthroughConfig {
    #[serde(default)]
    pub matchers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_url: Option<String>,
    #[serde(default = "default_passthrough_base_url")]
    pub base_url: String,
    #[serde(default = "default_lead_marker")]
    pub lead_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    4222
}

fn default_spoof_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_passthrough_base_url() -> String {
    ANTHROPIC_BASE_URL.to_string()
}

fn default_lead_marker() -> String {
    DEFAULT_LEAD_MARKER.to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    300
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            matchers: Vec::new(),
            lead_url: None,
            base_url: default_passthrough_base_url(),
            lead_marker: default_lead_marker(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl TargetConfig {
    /// Minimal target section for the given provider and model, everything
    /// else taken from the provider preset.
    pub fn new(provider: TargetProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            spoof_model: default_spoof_model(),
            url: None,
            api_key_env: None,
            access_token_env: None,
            account_id_env: None,
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// The endpoint translated requests are POSTed to (override or preset).
    pub fn effective_target_url(&self) -> String {
        self.target
            .url
            .clone()
            .unwrap_or_else(|| self.target.provider.preset().url.to_string())
    }

    /// Resolve the target provider credentials from the configured sources.
    pub fn resolve_credentials(&self) -> Result<ProviderCredentials> {
        let preset = self.target.provider.preset();
        let key_env = match self.target.provider {
            TargetProvider::OpenAi => self.target.api_key_env.as_deref(),
            TargetProvider::ChatGpt => self.target.access_token_env.as_deref(),
        }
        .unwrap_or(preset.default_api_key_env);
        let account_env = self
            .target
            .account_id_env
            .as_deref()
            .unwrap_or(preset.default_account_id_env);

        ProviderCredentials::resolve(self.target.provider, key_env, account_env)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.read_timeout_secs)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("anthropic-relay.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("anthropic-relay").join("config.toml"));
    }
    if let Some(home) = dirs_path() {
        paths.push(home.join(".config").join("anthropic-relay").join("config.toml"));
        paths.push(home.join(".anthropic-relay.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
