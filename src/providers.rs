//! Upstream provider presets and credential resolution.
//!
//! Each preset defines the default endpoint and the environment variables its
//! credentials are read from. Credentials are resolved once at startup into a
//! [`ProviderCredentials`] value that request handlers only ever read.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default Anthropic-compatible base URL used for passthrough.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Which non-Anthropic backend translated requests are sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProvider {
    /// OpenAI-compatible Chat Completions endpoint.
    #[serde(alias = "chat")]
    OpenAi,
    /// ChatGPT "Responses" backend (Codex).
    #[serde(alias = "codex")]
    ChatGpt,
}

/// Built-in defaults for a target provider.
#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub provider: TargetProvider,
    pub url: &'static str,
    pub default_api_key_env: &'static str,
    pub default_account_id_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        provider: TargetProvider::OpenAi,
        url: "https://api.openai.com/v1/chat/completions",
        default_api_key_env: "OPENAI_API_KEY",
        default_account_id_env: "",
    },
    ProviderPreset {
        provider: TargetProvider::ChatGpt,
        url: "https://chatgpt.com/backend-api/codex/responses",
        default_api_key_env: "CHATGPT_ACCESS_TOKEN",
        default_account_id_env: "CHATGPT_ACCOUNT_ID",
    },
];

impl TargetProvider {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "openai" | "chat" => Some(Self::OpenAi),
            "chatgpt" | "codex" => Some(Self::ChatGpt),
            _ => None,
        }
    }

    #[must_use]
    pub fn preset(self) -> &'static ProviderPreset {
        match self {
            Self::OpenAi => &PRESETS[0],
            Self::ChatGpt => &PRESETS[1],
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::ChatGpt => "chatgpt",
        }
    }
}

impl fmt::Display for TargetProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved credentials for the configured target provider.
#[derive(Clone)]
pub enum ProviderCredentials {
    OpenAi { api_key: String },
    ChatGpt { access_token: String, account_id: String },
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi { .. } => f.write_str("OpenAi { api_key: <redacted> }"),
            Self::ChatGpt { account_id, .. } => write!(
                f,
                "ChatGpt {{ access_token: <redacted>, account_id: {account_id} }}"
            ),
        }
    }
}

impl ProviderCredentials {
    /// Resolve credentials from the environment, falling back to the Codex
    /// CLI auth file for the ChatGPT backend.
    pub fn resolve(
        provider: TargetProvider,
        api_key_env: &str,
        account_id_env: &str,
    ) -> Result<Self> {
        match provider {
            TargetProvider::OpenAi => {
                let api_key = std::env::var(api_key_env).map_err(|_| {
                    ProxyError::config(format!(
                        "Environment variable '{api_key_env}' not set. Set it with your OpenAI API key."
                    ))
                })?;
                Ok(Self::OpenAi { api_key })
            }
            TargetProvider::ChatGpt => {
                let token = std::env::var(api_key_env).ok();
                let account = std::env::var(account_id_env).ok();
                if let (Some(access_token), Some(account_id)) = (token.clone(), account.clone()) {
                    return Ok(Self::ChatGpt {
                        access_token,
                        account_id,
                    });
                }

                let path = codex_auth_path().ok_or_else(|| {
                    ProxyError::config(format!(
                        "Set '{api_key_env}' and '{account_id_env}', or log in with the Codex CLI"
                    ))
                })?;
                let file = CodexAuthFile::load(&path)?;
                Ok(Self::ChatGpt {
                    access_token: token.unwrap_or(file.tokens.access_token),
                    account_id: account.unwrap_or(file.tokens.account_id),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodexAuthFile {
    tokens: CodexTokens,
}

#[derive(Debug, Deserialize)]
struct CodexTokens {
    access_token: String,
    account_id: String,
}

impl CodexAuthFile {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!(
                "ChatGPT credentials not in environment and {} unreadable: {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn codex_auth_path() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("CODEX_HOME") {
        return Some(PathBuf::from(home).join("auth.json"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".codex").join("auth.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_providers() {
        assert_eq!(TargetProvider::from_name("openai"), Some(TargetProvider::OpenAi));
        assert_eq!(TargetProvider::from_name("ChatGPT"), Some(TargetProvider::ChatGpt));
        assert_eq!(TargetProvider::from_name("codex"), Some(TargetProvider::ChatGpt));
        assert!(TargetProvider::from_name("fireworks").is_none());
    }

    #[test]
    fn test_presets_match_provider() {
        for provider in [TargetProvider::OpenAi, TargetProvider::ChatGpt] {
            assert_eq!(provider.preset().provider, provider);
        }
        assert!(TargetProvider::ChatGpt.preset().url.ends_with("/responses"));
    }

    #[test]
    fn test_codex_auth_file_parse() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"{{"OPENAI_API_KEY": null, "tokens": {{"access_token": "tok", "account_id": "acct", "id_token": "x"}}}}"#
        )
        .unwrap();

        let parsed = CodexAuthFile::load(f.path()).unwrap();
        assert_eq!(parsed.tokens.access_token, "tok");
        assert_eq!(parsed.tokens.account_id, "acct");
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = ProviderCredentials::ChatGpt {
            access_token: "secret-token".to_string(),
            account_id: "acct-1".to_string(),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret-token"));
        assert!(shown.contains("acct-1"));
    }
}
