//! Per-request routing: relay unmodified to an Anthropic-compatible server,
//! or translate for the configured target provider.
//!
//! Routing reads a lenient [`RoutingProbe`] rather than the strictly typed
//! request, so a passthrough request carrying content blocks this relay does
//! not model is still relayed byte for byte.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::config::ProxyConfig;

/// Marker a lead agent's prompt carries when it should go to Anthropic.
pub const DEFAULT_LEAD_MARKER: &str = "<lead-agent>";

/// Model names with this prefix are served natively by the passthrough server.
pub const NATIVE_MODEL_PREFIX: &str = "claude-";

/// Messages scanned (after the system text) when building the search text.
const SEARCH_MESSAGES: usize = 3;

/// Matches system prompts written for a delegated teammate agent.
fn teammate_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\byou are (?:a |an )?(?:teammate|sub-?agent)\b|\bteammate of\b|\bteam lead has assigned\b",
            )
            .ok()
        })
        .as_ref()
}

pub fn is_teammate_prompt(system_text: &str) -> bool {
    teammate_pattern().is_some_and(|re| re.is_match(system_text))
}

/// The subset of an inbound request that routing and session attribution
/// look at. Unknown fields and unknown content block shapes are tolerated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingProbe {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system: Option<serde_json::Value>,
    #[serde(default)]
    pub messages: Vec<ProbeMessage>,
    #[serde(default)]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl RoutingProbe {
    /// Lenient parse; an unparseable body yields an empty probe.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    pub fn system_text(&self) -> String {
        self.system.as_ref().map(value_text).unwrap_or_default()
    }

    /// System text followed by the text of the first few messages.
    pub fn search_text(&self) -> String {
        let mut parts = vec![self.system_text()];
        parts.extend(
            self.messages
                .iter()
                .take(SEARCH_MESSAGES)
                .map(|m| value_text(&m.content)),
        );
        parts.retain(|p| !p.is_empty());
        parts.join("\n")
    }

    pub fn tool_count(&self) -> usize {
        self.tools.as_ref().map_or(0, Vec::len)
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// Plain text of a string or of an array of blocks with `text` fields.
fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(serde_json::Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassthroughMatcher {
    /// `*`: every natively served model passes through.
    All,
    /// `lead`: prompts carrying the lead marker pass through.
    Lead,
    Model(String),
}

impl PassthroughMatcher {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "*" => Self::All,
            "lead" => Self::Lead,
            other => Self::Model(other.to_string()),
        }
    }
}

/// Which credentials go out with the upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSet {
    /// The client's own headers, relayed from the allow-list.
    Forwarded,
    /// The configured target provider credentials.
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub passthrough: bool,
    pub upstream_url: String,
    pub credentials: CredentialSet,
    /// Short description used in logs and error messages.
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    matchers: Vec<PassthroughMatcher>,
    lead_marker: String,
    lead_url: Option<String>,
    passthrough_base_url: String,
    target_url: String,
    target_label: String,
}

impl Classifier {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            matchers: config
                .passthrough
                .matchers
                .iter()
                .map(|m| PassthroughMatcher::parse(m))
                .collect(),
            lead_marker: config.passthrough.lead_marker.clone(),
            lead_url: config.passthrough.lead_url.clone(),
            passthrough_base_url: config.passthrough.base_url.trim_end_matches('/').to_string(),
            target_url: config.effective_target_url(),
            target_label: format!("{}:{}", config.target.provider, config.target.model),
        }
    }

    pub fn has_matchers(&self) -> bool {
        !self.matchers.is_empty()
    }

    /// Decide how one request is served. Pure: the same probe always yields
    /// the same decision.
    pub fn classify(&self, probe: &RoutingProbe) -> RoutingDecision {
        if self.matchers.is_empty() {
            return self.translate();
        }

        if self.matchers.contains(&PassthroughMatcher::All) {
            return if probe.model.starts_with(NATIVE_MODEL_PREFIX) {
                self.passthrough_to(&self.passthrough_base_url, "passthrough:*")
            } else {
                self.translate()
            };
        }

        if self.matchers.contains(&PassthroughMatcher::Lead) {
            let system = probe.system_text();
            let marked = !self.lead_marker.is_empty() && probe.search_text().contains(&self.lead_marker);
            if marked && !is_teammate_prompt(&system) {
                let base = self.lead_url.as_deref().unwrap_or(&self.passthrough_base_url);
                return self.passthrough_to(base, "passthrough:lead");
            }
        }

        let listed = self
            .matchers
            .iter()
            .any(|m| matches!(m, PassthroughMatcher::Model(name) if *name == probe.model));
        if listed {
            return self.passthrough_to(&self.passthrough_base_url, "passthrough:model");
        }

        self.translate()
    }

    fn translate(&self) -> RoutingDecision {
        RoutingDecision {
            passthrough: false,
            upstream_url: self.target_url.clone(),
            credentials: CredentialSet::Provider,
            label: self.target_label.clone(),
        }
    }

    fn passthrough_to(&self, base_url: &str, label: &str) -> RoutingDecision {
        RoutingDecision {
            passthrough: true,
            upstream_url: base_url.trim_end_matches('/').to_string(),
            credentials: CredentialSet::Forwarded,
            label: label.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::providers::TargetProvider;

    fn classifier(matchers: &[&str], lead_url: Option<&str>) -> Classifier {
        let mut config = ProxyConfig {
            port: 0,
            target: TargetConfig::new(TargetProvider::OpenAi, "gpt-4o"),
            passthrough: Default::default(),
            upstream: Default::default(),
            sessions: Default::default(),
        };
        config.passthrough.matchers = matchers.iter().map(|m| m.to_string()).collect();
        config.passthrough.lead_url = lead_url.map(str::to_string);
        Classifier::new(&config)
    }

    fn probe(body: serde_json::Value) -> RoutingProbe {
        RoutingProbe::from_body(body.to_string().as_bytes())
    }

    #[test]
    fn test_no_matchers_always_translates() {
        let c = classifier(&[], None);
        let d = c.classify(&probe(serde_json::json!({"model": "claude-opus-4", "messages": []})));
        assert!(!d.passthrough);
        assert_eq!(d.credentials, CredentialSet::Provider);
        assert_eq!(d.upstream_url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(d.label, "openai:gpt-4o");
    }

    #[test]
    fn test_star_matcher_uses_native_prefix() {
        let c = classifier(&["*"], None);
        let native = c.classify(&probe(serde_json::json!({"model": "claude-haiku-4"})));
        assert!(native.passthrough);
        assert_eq!(native.upstream_url, "https://api.anthropic.com");
        assert_eq!(native.credentials, CredentialSet::Forwarded);

        let other = c.classify(&probe(serde_json::json!({"model": "gpt-4o"})));
        assert!(!other.passthrough);
    }

    #[test]
    fn test_lead_marker_passes_through_to_lead_url() {
        let c = classifier(&["lead"], Some("http://lead.internal:8080/"));
        let d = c.classify(&probe(serde_json::json!({
            "model": "claude-sonnet-4",
            "system": [{"type": "text", "text": "You coordinate the team."}],
            "messages": [{"role": "user", "content": [{"type": "text", "text": "start <lead-agent>"}]}]
        })));
        assert!(d.passthrough);
        assert_eq!(d.upstream_url, "http://lead.internal:8080");
        assert_eq!(d.label, "passthrough:lead");
    }

    #[test]
    fn test_lead_marker_only_searched_in_first_messages() {
        let c = classifier(&["lead"], None);
        let d = c.classify(&probe(serde_json::json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": "b"},
                {"role": "user", "content": "c"},
                {"role": "assistant", "content": "<lead-agent>"}
            ]
        })));
        assert!(!d.passthrough);
    }

    #[test]
    fn test_teammate_phrase_overrides_lead_marker() {
        let c = classifier(&["lead"], None);
        let d = c.classify(&probe(serde_json::json!({
            "model": "claude-sonnet-4",
            "system": "You are a teammate working on the parser. <lead-agent>",
            "messages": [{"role": "user", "content": "<lead-agent> go"}]
        })));
        assert!(!d.passthrough);
        assert_eq!(d.credentials, CredentialSet::Provider);
    }

    #[test]
    fn test_literal_model_names() {
        let c = classifier(&["claude-opus-4-1", "claude-haiku-4"], None);
        assert!(c.classify(&probe(serde_json::json!({"model": "claude-opus-4-1"}))).passthrough);
        assert!(!c.classify(&probe(serde_json::json!({"model": "claude-sonnet-4"}))).passthrough);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier(&["lead", "claude-opus-4-1"], Some("http://lead"));
        let bodies = [
            serde_json::json!({"model": "claude-opus-4-1"}),
            serde_json::json!({"model": "x", "system": "<lead-agent>"}),
            serde_json::json!({"model": "x", "system": "You are a subagent. <lead-agent>"}),
            serde_json::json!({"model": "y"}),
        ];
        for body in bodies {
            let p = probe(body);
            assert_eq!(c.classify(&p), c.classify(&p));
        }
    }

    #[test]
    fn test_lenient_parse_tolerates_unknown_blocks_and_garbage() {
        let p = probe(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": [{"type": "future_block", "payload": 1}, {"type": "text", "text": "hi"}]}],
            "tools": [{"name": "Read"}]
        }));
        assert_eq!(p.search_text(), "hi");
        assert_eq!(p.tool_count(), 1);

        let empty = RoutingProbe::from_body(b"not json");
        assert_eq!(empty.model, "");
        assert!(empty.messages.is_empty());
    }
}
