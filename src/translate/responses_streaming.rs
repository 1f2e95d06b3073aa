//! State machine for translating Responses stream events into Anthropic SSE events.
//!
//! Logical units are keyed by the upstream `output_index`: a message item
//! becomes a text block (opened on its first text delta), a function call
//! item becomes a `tool_use` block (opened when the item is added). The
//! terminal `response.completed` / `response.incomplete` event carries usage
//! and ends the message.

use super::anthropic_types::{
    new_message_id, Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StreamEvent, Usage,
};
use super::response::{responses_stop_reason, tool_use_id};
use super::responses_types::{OutputItem, ResponseObject, ResponsesStreamEvent};
use super::streaming::StreamPhase;
use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum UnitKind {
    Text,
    Tool { call_id: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    /// Seen but not yet started; content is buffered.
    Pending,
    Live { index: usize },
    Closed,
}

/// One upstream output item, in first-seen order.
#[derive(Debug, Clone)]
struct Unit {
    output_index: u64,
    kind: UnitKind,
    state: UnitState,
    buffered: String,
    received: bool,
    done: bool,
}

/// Only one unit is live at a time. Items that start while another is live
/// are buffered and replayed, in order, once the live one is done, so
/// interleaved deltas never split or lose a block.
#[derive(Debug)]
pub struct ResponsesStreamTranslator {
    model: String,
    msg_id: String,
    phase: StreamPhase,
    next_index: usize,
    units: Vec<Unit>,
    incomplete_reason: Option<String>,
    usage: Option<(u64, u64)>,
}

impl ResponsesStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: new_message_id(),
            phase: StreamPhase::AwaitingStart,
            next_index: 0,
            units: Vec::new(),
            incomplete_reason: None,
            usage: None,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Process one upstream event. An upstream `response.failed` or `error`
    /// event is returned as an error; the caller decides whether the client
    /// can still be told.
    pub fn process_event(&mut self, event: &ResponsesStreamEvent) -> Result<Vec<StreamEvent>> {
        if self.phase == StreamPhase::Done {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        if self.phase == StreamPhase::AwaitingStart {
            events.push(self.make_message_start());
            events.push(StreamEvent::Ping);
            self.phase = StreamPhase::StreamingContent;
        }

        match event {
            ResponsesStreamEvent::Created { .. } | ResponsesStreamEvent::Other => {}
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                if let OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                    ..
                } = item
                {
                    let slot = self.unit(*output_index, tool_kind(call_id, name), &mut events);
                    self.push_content(slot, arguments, &mut events);
                }
            }
            ResponsesStreamEvent::OutputTextDelta {
                output_index,
                delta,
            } => {
                if !delta.is_empty() {
                    let slot = self.unit(*output_index, UnitKind::Text, &mut events);
                    self.push_content(slot, delta, &mut events);
                }
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
            } => {
                let slot = self.unit(*output_index, tool_kind("", ""), &mut events);
                self.push_content(slot, delta, &mut events);
            }
            ResponsesStreamEvent::OutputItemDone { output_index, item } => {
                self.finish_item(*output_index, item, &mut events);
            }
            ResponsesStreamEvent::Completed { response } => {
                self.record_usage(response);
                events.extend(self.finish());
            }
            ResponsesStreamEvent::Incomplete { response } => {
                self.record_usage(response);
                self.incomplete_reason = response
                    .incomplete_details
                    .as_ref()
                    .and_then(|d| d.reason.clone());
                events.extend(self.finish());
            }
            ResponsesStreamEvent::Failed { response } => {
                self.phase = StreamPhase::Done;
                let message = response
                    .error
                    .as_ref()
                    .map_or("response failed", |e| e.message.as_str());
                return Err(ProxyError::provider(format!("Upstream response failed: {message}")));
            }
            ResponsesStreamEvent::Error { code, message } => {
                self.phase = StreamPhase::Done;
                return Err(ProxyError::provider(format!(
                    "Upstream stream error{}: {message}",
                    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
                )));
            }
        }

        Ok(events)
    }

    /// Emit the terminal events. Also called when the upstream body ends
    /// without a terminal event. Idempotent.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.phase == StreamPhase::Done {
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.phase == StreamPhase::AwaitingStart {
            events.push(self.make_message_start());
        }
        for unit in &mut self.units {
            unit.done = true;
        }
        self.close_live(&mut events);
        self.advance(&mut events);

        let has_tools = self
            .units
            .iter()
            .any(|u| matches!(u.kind, UnitKind::Tool { .. }));
        let stop_reason = responses_stop_reason(has_tools, self.incomplete_reason.as_deref());
        let (input_tokens, output_tokens) = match self.usage {
            Some((input, output)) => (Some(input), output),
            None => (None, 0),
        };

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens,
                output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        self.phase = StreamPhase::Done;
        events
    }

    /// Slot of the unit for `output_index`, registering it on first sight.
    /// A new unit starts immediately when nothing else is live or waiting.
    fn unit(&mut self, output_index: u64, kind: UnitKind, events: &mut Vec<StreamEvent>) -> usize {
        if let Some(slot) = self.units.iter().position(|u| u.output_index == output_index) {
            if let (UnitKind::Tool { call_id, name }, UnitKind::Tool { call_id: new_id, name: new_name }) =
                (&mut self.units[slot].kind, kind)
            {
                if call_id.is_empty() {
                    *call_id = new_id;
                }
                if name.is_empty() {
                    *name = new_name;
                }
            }
            return slot;
        }

        self.units.push(Unit {
            output_index,
            kind,
            state: UnitState::Pending,
            buffered: String::new(),
            received: false,
            done: false,
        });
        self.advance(events);
        self.units.len() - 1
    }

    fn push_content(&mut self, slot: usize, fragment: &str, events: &mut Vec<StreamEvent>) {
        if fragment.is_empty() {
            return;
        }
        let unit = &mut self.units[slot];
        unit.received = true;
        match unit.state {
            UnitState::Live { index } => events.push(content_delta(&unit.kind, index, fragment)),
            UnitState::Pending => unit.buffered.push_str(fragment),
            UnitState::Closed => {
                tracing::warn!(output_index = unit.output_index, "content after output_item.done ignored");
            }
        }
    }

    fn finish_item(&mut self, output_index: u64, item: &OutputItem, events: &mut Vec<StreamEvent>) {
        let slot = match item {
            // Backends that skip output_item.added or argument deltas still
            // deliver the whole call here.
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                let slot = self.unit(output_index, tool_kind(call_id, name), events);
                if !self.units[slot].received {
                    self.push_content(slot, arguments, events);
                }
                slot
            }
            _ => match self.units.iter().position(|u| u.output_index == output_index) {
                Some(slot) => slot,
                None => return,
            },
        };

        self.units[slot].done = true;
        if matches!(self.units[slot].state, UnitState::Live { .. }) {
            self.close_live(events);
            self.advance(events);
        }
    }

    /// Start waiting units in order while nothing is live. Units that are
    /// already done are replayed whole and closed.
    fn advance(&mut self, events: &mut Vec<StreamEvent>) {
        if self.units.iter().any(|u| matches!(u.state, UnitState::Live { .. })) {
            return;
        }
        for slot in 0..self.units.len() {
            if self.units[slot].state != UnitState::Pending {
                continue;
            }
            let index = self.next_index;
            self.next_index += 1;

            let unit = &mut self.units[slot];
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: match &unit.kind {
                    UnitKind::Text => ResponseContentBlock::Text {
                        text: String::new(),
                    },
                    UnitKind::Tool { call_id, name } => ResponseContentBlock::ToolUse {
                        id: tool_use_id(call_id),
                        name: name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                },
            });
            if !unit.buffered.is_empty() {
                let buffered = std::mem::take(&mut unit.buffered);
                events.push(content_delta(&unit.kind, index, &buffered));
            }
            if unit.done {
                unit.state = UnitState::Closed;
                events.push(StreamEvent::ContentBlockStop { index });
            } else {
                unit.state = UnitState::Live { index };
                return;
            }
        }
    }

    fn close_live(&mut self, events: &mut Vec<StreamEvent>) {
        for unit in &mut self.units {
            if let UnitState::Live { index } = unit.state {
                unit.state = UnitState::Closed;
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }
    }

    fn record_usage(&mut self, response: &ResponseObject) {
        if let Some(ref usage) = response.usage {
            self.usage = Some((usage.input_tokens, usage.output_tokens));
        }
    }

    fn make_message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }
    }
}

fn tool_kind(call_id: &str, name: &str) -> UnitKind {
    UnitKind::Tool {
        call_id: call_id.to_string(),
        name: name.to_string(),
    }
}

fn content_delta(kind: &UnitKind, index: usize, fragment: &str) -> StreamEvent {
    let delta = match kind {
        UnitKind::Text => Delta::TextDelta {
            text: fragment.to_string(),
        },
        UnitKind::Tool { .. } => Delta::InputJsonDelta {
            partial_json: fragment.to_string(),
        },
    };
    StreamEvent::ContentBlockDelta { index, delta }
}
