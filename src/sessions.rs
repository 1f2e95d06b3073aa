//! Attribution of inbound requests to long-lived agent identities.
//!
//! Purely diagnostic: a request is tagged with a session for console output
//! and for that session's JSONL log. Nothing here feeds back into routing or
//! translation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use colored::{Color, ColoredString, Colorize};

use crate::logging::{LogLevel, SharedLogger};
use crate::routing::{is_teammate_prompt, RoutingDecision, RoutingProbe};

/// Largest message-count growth still attributed to the same teammate.
pub const MAX_ATTACH_GAP: usize = 8;

const TEAMMATE_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Magenta,
    Color::Yellow,
    Color::Blue,
    Color::BrightRed,
    Color::BrightCyan,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Lead,
    Teammate,
    Warmup,
}

impl SessionKind {
    /// No tools means a warmup probe; otherwise the system prompt decides.
    pub fn infer(probe: &RoutingProbe) -> Self {
        if probe.tool_count() == 0 {
            Self::Warmup
        } else if is_teammate_prompt(&probe.system_text()) {
            Self::Teammate
        } else {
            Self::Lead
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    last_message_count: usize,
    requests: u64,
}

pub struct AgentSession {
    pub key: String,
    pub label: String,
    pub color: Color,
    pub kind: SessionKind,
    state: Mutex<SessionState>,
    sink: SharedLogger,
}

impl AgentSession {
    pub fn last_message_count(&self) -> usize {
        self.state.lock().map(|s| s.last_message_count).unwrap_or(0)
    }

    pub fn requests(&self) -> u64 {
        self.state.lock().map(|s| s.requests).unwrap_or(0)
    }

    /// Colored `[label]` prefix for console lines.
    pub fn tag(&self) -> ColoredString {
        let text = format!("[{}]", self.label);
        text.as_str().color(self.color)
    }

    /// Append one request record to this session's log.
    pub fn record(&self, probe: &RoutingProbe, decision: &RoutingDecision) {
        let request = match self.state.lock() {
            Ok(state) => state.requests,
            Err(_) => return,
        };
        self.sink.log_with_context(
            LogLevel::Info,
            "request",
            format!("{} -> {}", probe.model, decision.label),
            serde_json::json!({
                "request": request,
                "messages": probe.messages.len(),
                "tools": probe.tool_count(),
                "stream": probe.is_streaming(),
                "passthrough": decision.passthrough,
            }),
        );
    }

    pub fn note(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(crate::logging::LogEntry::new(level, "session", message));
    }

    fn observe(&self, message_count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.last_message_count = message_count;
            state.requests += 1;
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    sessions: Vec<Arc<AgentSession>>,
    next_teammate: usize,
}

/// Owned table of live sessions, created at startup and closed at shutdown.
pub struct SessionRegistry {
    log_dir: Option<PathBuf>,
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self {
            log_dir,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Find or create the session this request belongs to and count the request.
    pub fn attribute(&self, probe: &RoutingProbe) -> Option<Arc<AgentSession>> {
        let kind = SessionKind::infer(probe);
        let count = probe.messages.len();

        let (key, label, color) = {
            let mut inner = self.inner.lock().ok()?;
            if let Some(session) = find_session(&inner, kind, count) {
                drop(inner);
                session.observe(count);
                return Some(session);
            }
            allocate_identity(kind, &mut inner)
        };

        // The sink file is opened with the registry unlocked.
        let sink = self.open_sink(&key);

        let mut inner = self.inner.lock().ok()?;
        let raced = match kind {
            SessionKind::Lead | SessionKind::Warmup => {
                inner.sessions.iter().find(|s| s.kind == kind).cloned()
            }
            SessionKind::Teammate => None,
        };
        let session = match raced {
            Some(session) => session,
            None => {
                let session = Arc::new(AgentSession {
                    key,
                    label,
                    color,
                    kind,
                    state: Mutex::new(SessionState::default()),
                    sink,
                });
                inner.sessions.push(session.clone());
                tracing::info!(session = %session.key, "New agent session");
                session
            }
        };
        drop(inner);

        session.observe(count);
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and close every session sink.
    pub fn close_all(&self) {
        let Ok(inner) = self.inner.lock() else {
            return;
        };
        for session in &inner.sessions {
            session.note(
                LogLevel::Info,
                format!("Session closed after {} requests", session.requests()),
            );
            session.sink.close();
        }
    }

    fn open_sink(&self, key: &str) -> SharedLogger {
        let Some(ref dir) = self.log_dir else {
            return SharedLogger::disabled();
        };
        let path = dir.join(format!("{key}.jsonl"));
        SharedLogger::new(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to open session log");
            SharedLogger::disabled()
        })
    }
}

/// Lead and warmup are singletons. A teammate continues the session whose
/// last message count is closest below `count`, within [`MAX_ATTACH_GAP`].
fn find_session(inner: &RegistryInner, kind: SessionKind, count: usize) -> Option<Arc<AgentSession>> {
    match kind {
        SessionKind::Lead | SessionKind::Warmup => {
            inner.sessions.iter().find(|s| s.kind == kind).cloned()
        }
        SessionKind::Teammate => inner
            .sessions
            .iter()
            .filter(|s| s.kind == SessionKind::Teammate)
            .filter_map(|s| {
                let gap = count.checked_sub(s.last_message_count())?;
                (gap <= MAX_ATTACH_GAP).then_some((gap, s))
            })
            .min_by_key(|(gap, _)| *gap)
            .map(|(_, s)| s.clone()),
    }
}

fn allocate_identity(kind: SessionKind, inner: &mut RegistryInner) -> (String, String, Color) {
    match kind {
        SessionKind::Lead => ("lead".to_string(), "lead".to_string(), Color::Green),
        SessionKind::Warmup => ("warmup".to_string(), "warmup".to_string(), Color::BrightBlack),
        SessionKind::Teammate => {
            inner.next_teammate += 1;
            let n = inner.next_teammate;
            (
                format!("teammate-{n}"),
                format!("teammate {n}"),
                TEAMMATE_COLORS[(n - 1) % TEAMMATE_COLORS.len()],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEAMMATE_SYSTEM: &str = "You are a teammate on the refactor.";

    fn probe(system: &str, messages: usize, tools: usize) -> RoutingProbe {
        let messages: Vec<serde_json::Value> = (0..messages)
            .map(|i| {
                let role = if i % 2 == 0 { "user" } else { "assistant" };
                serde_json::json!({"role": role, "content": "x"})
            })
            .collect();
        let tools: Vec<serde_json::Value> = (0..tools)
            .map(|i| serde_json::json!({"name": format!("tool{i}")}))
            .collect();
        let body = serde_json::json!({
            "model": "claude-sonnet-4",
            "system": system,
            "messages": messages,
            "tools": tools,
        });
        RoutingProbe::from_body(body.to_string().as_bytes())
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(SessionKind::infer(&probe(TEAMMATE_SYSTEM, 1, 0)), SessionKind::Warmup);
        assert_eq!(SessionKind::infer(&probe(TEAMMATE_SYSTEM, 1, 2)), SessionKind::Teammate);
        assert_eq!(SessionKind::infer(&probe("You lead.", 1, 2)), SessionKind::Lead);
    }

    #[test]
    fn test_teammate_attaches_within_gap() {
        let registry = SessionRegistry::new(None);
        let first = registry.attribute(&probe(TEAMMATE_SYSTEM, 4, 3)).unwrap();
        let second = registry.attribute(&probe(TEAMMATE_SYSTEM, 6, 3)).unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(second.requests(), 2);
        assert_eq!(second.last_message_count(), 6);

        let third = registry.attribute(&probe(TEAMMATE_SYSTEM, 30, 3)).unwrap();
        assert_eq!(third.key, "teammate-2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_smallest_gap_wins_and_shrinking_count_is_new() {
        let registry = SessionRegistry::new(None);
        let a = registry.attribute(&probe(TEAMMATE_SYSTEM, 2, 1)).unwrap();
        let b = registry.attribute(&probe(TEAMMATE_SYSTEM, 20, 1)).unwrap();
        assert_ne!(a.key, b.key);

        let next = registry.attribute(&probe(TEAMMATE_SYSTEM, 22, 1)).unwrap();
        assert_eq!(next.key, b.key);

        // A count below every teammate's last count cannot be a continuation.
        let fresh = registry.attribute(&probe(TEAMMATE_SYSTEM, 1, 1)).unwrap();
        assert_eq!(fresh.key, "teammate-3");
    }

    #[test]
    fn test_lead_and_warmup_are_singletons() {
        let registry = SessionRegistry::new(None);
        let lead = registry.attribute(&probe("You lead.", 3, 5)).unwrap();
        let lead_again = registry.attribute(&probe("You lead.", 90, 5)).unwrap();
        let warmup = registry.attribute(&probe("", 1, 0)).unwrap();
        assert_eq!(lead.key, "lead");
        assert_eq!(lead_again.key, "lead");
        assert_eq!(warmup.kind, SessionKind::Warmup);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_session_logs_are_written_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(Some(dir.path().to_path_buf()));
        let p = probe(TEAMMATE_SYSTEM, 4, 1);
        let session = registry.attribute(&p).unwrap();
        let decision = RoutingDecision {
            passthrough: false,
            upstream_url: "http://upstream".to_string(),
            credentials: crate::routing::CredentialSet::Provider,
            label: "openai:gpt-4o".to_string(),
        };
        session.record(&p, &decision);
        registry.close_all();

        let content = std::fs::read_to_string(dir.path().join("teammate-1.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["context"]["messages"], 4);
        assert_eq!(lines[0]["message"], "claude-sonnet-4 -> openai:gpt-4o");
    }

    #[test]
    fn test_concurrent_attribution_keeps_singletons() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(Some(dir.path().to_path_buf()));

        let keys: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let registry = &registry;
                    scope.spawn(move || {
                        let p = if i % 2 == 0 {
                            probe("You lead.", 3, 5)
                        } else {
                            probe("", 1, 0)
                        };
                        registry.attribute(&p).unwrap().key.clone()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 2);
        assert_eq!(keys.iter().filter(|k| *k == "lead").count(), 4);
        assert_eq!(keys.iter().filter(|k| *k == "warmup").count(), 4);

        let lead = registry.attribute(&probe("You lead.", 4, 5)).unwrap();
        assert_eq!(lead.requests(), 5);
        registry.close_all();
        assert!(dir.path().join("lead.jsonl").exists());
        assert!(dir.path().join("warmup.jsonl").exists());
    }
}
