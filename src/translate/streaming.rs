//! State machine for translating OpenAI streaming chunks into Anthropic SSE events.
//!
//! The [`StreamTranslator`] processes OpenAI `ChatCompletionChunk`s one at a time,
//! maintaining state about which content block is open, and emitting the
//! corresponding Anthropic stream events (`message_start`, `content_block_delta`, etc.).
//!
//! Phases run `AwaitingStart → StreamingContent → AwaitingStop → Done`. The
//! finish reason moves the translator to `AwaitingStop` but the terminal
//! events wait for [`StreamTranslator::finish`], because servers send the
//! usage totals in a trailing chunk after the finish reason.

use super::anthropic_types::{
    new_message_id, Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::response::{map_finish_reason, tool_use_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    AwaitingStart,
    StreamingContent,
    AwaitingStop,
    Done,
}

/// The one content block currently receiving live deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text { index: usize },
    Tool { slot: usize, index: usize },
}

impl OpenBlock {
    fn index(self) -> usize {
        match self {
            OpenBlock::Text { index } | OpenBlock::Tool { index, .. } => index,
        }
    }
}

/// Identity of one upstream tool call. Servers that omit `index` are keyed
/// by call id instead.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ToolKey {
    Index(u64),
    Id(String),
}

/// Everything received so far for one upstream tool call.
#[derive(Debug, Clone)]
struct ToolAccumulator {
    key: ToolKey,
    id: String,
    name: String,
    arguments: String,
}

/// Content held back because another tool block was still live when it
/// arrived. Flushed in arrival order once the live block closes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Deferred {
    Text(String),
    Tool(usize),
}

/// State machine that translates OpenAI streaming chunks into Anthropic SSE events.
///
/// The first tool call streams its argument fragments live and stays open
/// until the finish reason, since upstream may interleave fragments of
/// parallel calls. Later calls, and any text that arrives while a call is
/// open, are buffered and emitted whole when the block closes.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   for chunk in openai_chunks {
///       let events = translator.process_chunk(&chunk);
///       // send each event as SSE
///   }
///   let final_events = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    phase: StreamPhase,
    next_index: usize,
    open: Option<OpenBlock>,
    tools: Vec<ToolAccumulator>,
    last_tool: Option<usize>,
    deferred: Vec<Deferred>,
    finish_reason: Option<String>,
    input_tokens: Option<u64>,
    output_tokens: u64,
}

impl StreamTranslator {
    /// `model` is the name reported to the client, never the upstream's.
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: new_message_id(),
            phase: StreamPhase::AwaitingStart,
            next_index: 0,
            open: None,
            tools: Vec::new(),
            last_tool: None,
            deferred: Vec::new(),
            finish_reason: None,
            input_tokens: None,
            output_tokens: 0,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Arguments accumulated so far for an upstream tool call index.
    pub fn tool_arguments(&self, upstream_index: u64) -> Option<&str> {
        self.tools
            .iter()
            .find(|t| t.key == ToolKey::Index(upstream_index))
            .map(|t| t.arguments.as_str())
    }

    /// Process a single OpenAI streaming chunk, returning zero or more Anthropic SSE events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.phase == StreamPhase::Done {
            return Vec::new();
        }

        let mut events = Vec::new();

        if let Some(ref usage) = chunk.usage {
            self.input_tokens = Some(usage.prompt_tokens);
            self.output_tokens = usage.completion_tokens;
        }

        if self.phase == StreamPhase::AwaitingStart {
            events.push(self.make_message_start());
            events.push(StreamEvent::Ping);
            self.phase = StreamPhase::StreamingContent;
        }

        if self.phase != StreamPhase::StreamingContent {
            return events;
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        // `reasoning_content` only counts when the delta has no regular content.
        let effective_content = choice
            .delta
            .content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                choice
                    .delta
                    .reasoning_content
                    .as_deref()
                    .filter(|s| !s.is_empty())
            });

        if let Some(text) = effective_content {
            self.push_text(text, &mut events);
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                self.push_tool_fragment(tc, &mut events);
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.close_blocks(&mut events);
            self.finish_reason = Some(reason.clone());
            self.phase = StreamPhase::AwaitingStop;
        }

        events
    }

    /// Call when the stream ends (on `[DONE]` or end of body) to emit the
    /// terminal events. Idempotent.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.phase == StreamPhase::Done {
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.phase == StreamPhase::AwaitingStart {
            events.push(self.make_message_start());
        }
        self.close_blocks(&mut events);

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(map_finish_reason(self.finish_reason.as_deref()).to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        self.phase = StreamPhase::Done;
        events
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match self.open {
            Some(OpenBlock::Text { index }) => index,
            Some(OpenBlock::Tool { .. }) => {
                match self.deferred.last_mut() {
                    Some(Deferred::Text(pending)) => pending.push_str(text),
                    _ => self.deferred.push(Deferred::Text(text.to_string())),
                }
                return;
            }
            None => {
                let index = self.start_text_block(events);
                self.open = Some(OpenBlock::Text { index });
                index
            }
        };

        events.push(text_delta(index, text));
    }

    fn push_tool_fragment(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let slot = self.tool_slot(tc);
        self.last_tool = Some(slot);
        let fragment = tc
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or("");
        self.tools[slot].arguments.push_str(fragment);

        let index = match self.open {
            Some(OpenBlock::Tool { slot: live, index }) if live == slot => index,
            Some(OpenBlock::Tool { .. }) => {
                if !self.deferred.contains(&Deferred::Tool(slot)) {
                    self.deferred.push(Deferred::Tool(slot));
                }
                return;
            }
            Some(OpenBlock::Text { .. }) | None => {
                self.close_open_block(events);
                let index = self.start_tool_block(slot, events);
                self.open = Some(OpenBlock::Tool { slot, index });
                index
            }
        };

        if !fragment.is_empty() {
            events.push(json_delta(index, fragment));
        }
    }

    /// Find or register the accumulator for this fragment. A fragment with
    /// neither index nor id continues the most recent call.
    fn tool_slot(&mut self, tc: &ChunkToolCall) -> usize {
        let id = tc.id.as_deref().filter(|id| !id.is_empty());
        let key = match (tc.index, id) {
            (Some(index), _) => ToolKey::Index(index),
            (None, Some(id)) => ToolKey::Id(id.to_string()),
            (None, None) => match self.last_tool {
                Some(slot) => self.tools[slot].key.clone(),
                None => ToolKey::Index(0),
            },
        };

        let slot = match self.tools.iter().position(|t| t.key == key) {
            Some(slot) => slot,
            None => {
                self.tools.push(ToolAccumulator {
                    key,
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                });
                self.tools.len() - 1
            }
        };

        let acc = &mut self.tools[slot];
        if acc.id.is_empty() {
            if let Some(id) = id {
                acc.id = id.to_string();
            }
        }
        if acc.name.is_empty() {
            if let Some(name) = tc.function.as_ref().and_then(|f| f.name.as_deref()) {
                acc.name = name.to_string();
            }
        }
        slot
    }

    /// Close the live block, then emit every buffered unit whole.
    fn close_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        self.close_open_block(events);
        for unit in std::mem::take(&mut self.deferred) {
            match unit {
                Deferred::Text(text) => {
                    let index = self.start_text_block(events);
                    events.push(text_delta(index, &text));
                    events.push(StreamEvent::ContentBlockStop { index });
                }
                Deferred::Tool(slot) => {
                    let index = self.start_tool_block(slot, events);
                    if !self.tools[slot].arguments.is_empty() {
                        events.push(json_delta(index, &self.tools[slot].arguments));
                    }
                    events.push(StreamEvent::ContentBlockStop { index });
                }
            }
        }
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(open) = self.open.take() {
            events.push(StreamEvent::ContentBlockStop {
                index: open.index(),
            });
        }
    }

    fn start_text_block(&mut self, events: &mut Vec<StreamEvent>) -> usize {
        let index = self.allocate_index();
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        });
        index
    }

    fn start_tool_block(&mut self, slot: usize, events: &mut Vec<StreamEvent>) -> usize {
        let index = self.allocate_index();
        let acc = &self.tools[slot];
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::ToolUse {
                id: tool_use_id(&acc.id),
                name: acc.name.clone(),
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        });
        index
    }

    fn allocate_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
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
                usage: Usage {
                    input_tokens: self.input_tokens.unwrap_or(0),
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        }
    }
}

fn text_delta(index: usize, text: &str) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: Delta::TextDelta {
            text: text.to_string(),
        },
    }
}

fn json_delta(index: usize, partial_json: &str) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: Delta::InputJsonDelta {
            partial_json: partial_json.to_string(),
        },
    }
}

/// Concatenated `tool_use` blocks of a finished event list as
/// `(block index, id, name, arguments)`.
#[cfg(test)]
pub(crate) fn collect_tool_blocks(events: &[StreamEvent]) -> Vec<(usize, String, String, String)> {
    let mut blocks: Vec<(usize, String, String, String)> = Vec::new();
    for event in events {
        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse { id, name, .. },
            } => blocks.push((*index, id.clone(), name.clone(), String::new())),
            StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json },
            } => {
                if let Some(block) = blocks.iter_mut().find(|b| b.0 == *index) {
                    block.3.push_str(partial_json);
                }
            }
            _ => {}
        }
    }
    blocks
}

/// Structural checks shared by the translator tests: one start, one stop,
/// balanced and monotonically indexed content blocks.
#[cfg(test)]
pub(crate) fn assert_well_formed(events: &[StreamEvent]) {
    let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
    assert_eq!(names.iter().filter(|n| **n == "message_start").count(), 1);
    assert_eq!(names.iter().filter(|n| **n == "message_stop").count(), 1);
    assert_eq!(names.first(), Some(&"message_start"));
    assert_eq!(names.last(), Some(&"message_stop"));

    let mut open: Option<usize> = None;
    let mut next = 0usize;
    for event in events {
        match event {
            StreamEvent::ContentBlockStart { index, .. } => {
                assert!(open.is_none(), "block {index} opened while another is open");
                assert_eq!(*index, next, "block indices must be sequential");
                open = Some(*index);
                next += 1;
            }
            StreamEvent::ContentBlockDelta { index, .. } => {
                assert_eq!(open, Some(*index), "delta outside its open block");
            }
            StreamEvent::ContentBlockStop { index } => {
                assert_eq!(open.take(), Some(*index), "unbalanced block stop");
            }
            _ => {}
        }
    }
    assert!(open.is_none(), "block left open at message_stop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;

    fn chunk(delta: ChunkDelta, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn text_chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
        chunk(
            ChunkDelta {
                content: Some(content.to_string()),
                ..ChunkDelta::default()
            },
            finish,
        )
    }

    fn tool_chunk(index: u64, id: Option<&str>, name: Option<&str>, args: &str) -> ChatCompletionChunk {
        chunk(
            ChunkDelta {
                tool_calls: Some(vec![ChunkToolCall {
                    index: Some(index),
                    id: id.map(String::from),
                    call_type: id.map(|_| "function".to_string()),
                    function: Some(ChunkToolCallFunction {
                        name: name.map(String::from),
                        arguments: Some(args.to_string()),
                    }),
                }]),
                ..ChunkDelta::default()
            },
            None,
        )
    }

    fn usage_chunk(prompt: u64, completion: u64) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: Vec::new(),
            usage: Some(ChatUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
        }
    }

    fn run(chunks: &[ChatCompletionChunk]) -> (StreamTranslator, Vec<StreamEvent>) {
        let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
        let mut events = Vec::new();
        for c in chunks {
            events.extend(translator.process_chunk(c));
        }
        events.extend(translator.finish());
        (translator, events)
    }

    fn stop_reason(events: &[StreamEvent]) -> Option<String> {
        events.iter().find_map(|e| match e {
            StreamEvent::MessageDelta { delta, .. } => delta.stop_reason.clone(),
            _ => None,
        })
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::new("test-model");

        let events = translator.process_chunk(&text_chunk("Hello", None));
        let event_names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            event_names,
            vec!["message_start", "ping", "content_block_start", "content_block_delta"]
        );
        assert_eq!(translator.phase(), StreamPhase::StreamingContent);

        let events = translator.process_chunk(&text_chunk(" world", None));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "content_block_delta");

        let events = translator.process_chunk(&text_chunk("", Some("stop")));
        let event_names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(event_names, vec!["content_block_stop"]);
        assert_eq!(translator.phase(), StreamPhase::AwaitingStop);

        let events = translator.finish();
        let event_names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(event_names, vec!["message_delta", "message_stop"]);
        assert_eq!(translator.phase(), StreamPhase::Done);
        assert!(translator.finish().is_empty());
    }

    #[test]
    fn test_message_start_reports_spoof_model() {
        let mut translator = StreamTranslator::new("claude-opus-4-20250514");
        let events = translator.process_chunk(&text_chunk("hi", None));
        match &events[0] {
            StreamEvent::MessageStart { message } => {
                assert_eq!(message.model, "claude-opus-4-20250514");
                assert!(message.id.starts_with("msg_"));
            }
            other => panic!("expected message_start, got {other:?}"),
        }
    }

    #[test]
    fn test_text_then_tool_call() {
        let (_, events) = run(&[
            text_chunk("Checking...", None),
            tool_chunk(0, Some("call_abc"), Some("search"), "{\"q\""),
            tool_chunk(0, None, None, ":\"rust\"}"),
            chunk(ChunkDelta::default(), Some("tool_calls")),
        ]);

        assert_well_formed(&events);
        let starts: Vec<&ResponseContentBlock> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStart { content_block, .. } => Some(content_block),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(matches!(starts[1], ResponseContentBlock::ToolUse { id, name, .. }
            if id == "call_abc" && name == "search"));
        assert_eq!(stop_reason(&events).as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_argument_fragments_reassemble_under_one_index() {
        let whole = serde_json::json!({"command": "ls -la", "timeout": 30});
        let (translator, events) = run(&[
            tool_chunk(0, Some("call_1"), Some("Bash"), ""),
            tool_chunk(0, None, None, "{\"comm"),
            tool_chunk(0, None, None, "and\": \"ls -la\", "),
            tool_chunk(0, None, None, "\"timeout\": 30}"),
            chunk(ChunkDelta::default(), Some("tool_calls")),
        ]);

        assert_well_formed(&events);
        let mut indices = Vec::new();
        let mut joined = String::new();
        for event in &events {
            if let StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json },
            } = event
            {
                indices.push(*index);
                joined.push_str(partial_json);
            }
        }
        assert_eq!(indices, vec![0, 0, 0]);
        assert_eq!(serde_json::from_str::<serde_json::Value>(&joined).unwrap(), whole);
        assert_eq!(translator.tool_arguments(0), Some(joined.as_str()));
    }

    #[test]
    fn test_parallel_tool_calls_get_sequential_blocks() {
        let (_, events) = run(&[
            tool_chunk(0, Some("call_a"), Some("Read"), "{\"path\":\"a\"}"),
            tool_chunk(1, Some("call_b"), Some("Read"), "{\"path\":"),
            tool_chunk(1, None, None, "\"b\"}"),
            chunk(ChunkDelta::default(), Some("tool_calls")),
        ]);

        assert_well_formed(&events);
        let blocks = collect_tool_blocks(&events);
        assert_eq!(
            blocks,
            vec![
                (0, "call_a".to_string(), "Read".to_string(), "{\"path\":\"a\"}".to_string()),
                (1, "call_b".to_string(), "Read".to_string(), "{\"path\":\"b\"}".to_string()),
            ]
        );
    }

    #[test]
    fn test_interleaved_tool_fragments_stay_with_their_call() {
        let (_, events) = run(&[
            tool_chunk(0, Some("call_a"), Some("Read"), "{\"path\":"),
            tool_chunk(1, Some("call_b"), Some("Read"), "{\"path\":\"b\"}"),
            tool_chunk(0, None, None, "\"a\"}"),
            chunk(ChunkDelta::default(), Some("tool_calls")),
        ]);

        assert_well_formed(&events);
        let blocks = collect_tool_blocks(&events);
        assert_eq!(blocks.len(), 2);
        for (index, id, _, arguments) in &blocks {
            let parsed: serde_json::Value = serde_json::from_str(arguments)
                .unwrap_or_else(|e| panic!("block {index} arguments {arguments:?}: {e}"));
            let expected = if id == "call_a" { "a" } else { "b" };
            assert_eq!(parsed["path"], expected);
        }
        assert_eq!(blocks[0].1, "call_a");
        assert_eq!(blocks[1].1, "call_b");
    }

    #[test]
    fn test_text_during_open_tool_call_is_kept() {
        let (_, events) = run(&[
            tool_chunk(0, Some("call_a"), Some("Read"), "{\"path\":"),
            text_chunk("one moment", None),
            tool_chunk(0, None, None, "\"a\"}"),
            chunk(ChunkDelta::default(), Some("tool_calls")),
        ]);

        assert_well_formed(&events);
        assert_eq!(collect_tool_blocks(&events)[0].3, "{\"path\":\"a\"}");
        assert!(events.iter().any(|e| matches!(e,
            StreamEvent::ContentBlockDelta { index: 1, delta: Delta::TextDelta { text } } if text == "one moment")));
    }

    #[test]
    fn test_tool_calls_without_index_are_keyed_by_id() {
        let unindexed = |id: Option<&str>, name: Option<&str>, args: &str| {
            let mut c = tool_chunk(0, id, name, args);
            if let Some(calls) = c.choices[0].delta.tool_calls.as_mut() {
                calls[0].index = None;
            }
            c
        };
        let (_, events) = run(&[
            unindexed(Some("call_a"), Some("Read"), "{\"path\":"),
            unindexed(None, None, "\"a\"}"),
            unindexed(Some("call_b"), Some("Glob"), "{\"path\":\"b\"}"),
            chunk(ChunkDelta::default(), Some("tool_calls")),
        ]);

        assert_well_formed(&events);
        assert_eq!(
            collect_tool_blocks(&events),
            vec![
                (0, "call_a".to_string(), "Read".to_string(), "{\"path\":\"a\"}".to_string()),
                (1, "call_b".to_string(), "Glob".to_string(), "{\"path\":\"b\"}".to_string()),
            ]
        );
    }

    #[test]
    fn test_usage_after_finish_reason_lands_in_message_delta() {
        let (_, events) = run(&[
            text_chunk("Hi", None),
            text_chunk("", Some("length")),
            usage_chunk(12, 34),
        ]);

        assert_well_formed(&events);
        match events.iter().find(|e| e.event_name() == "message_delta") {
            Some(StreamEvent::MessageDelta { delta, usage }) => {
                assert_eq!(delta.stop_reason.as_deref(), Some("max_tokens"));
                assert_eq!(usage.input_tokens, Some(12));
                assert_eq!(usage.output_tokens, 34);
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_finish_reason_is_end_turn() {
        let (_, events) = run(&[text_chunk("partial", None)]);
        assert_well_formed(&events);
        assert_eq!(stop_reason(&events).as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_reasoning_content_relayed_as_text() {
        let (_, events) = run(&[chunk(
            ChunkDelta {
                reasoning_content: Some("thinking...".to_string()),
                ..ChunkDelta::default()
            },
            None,
        )]);
        assert_well_formed(&events);
        assert!(events.iter().any(|e| matches!(e,
            StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text }, .. } if text == "thinking...")));
    }

    #[test]
    fn test_finish_without_chunks() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.finish();

        let event_names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(event_names, vec!["message_start", "message_delta", "message_stop"]);
    }

    #[test]
    fn test_content_after_finish_is_ignored() {
        let (_, events) = run(&[
            text_chunk("done", Some("stop")),
            text_chunk("stray", None),
        ]);
        assert_well_formed(&events);
        assert!(!events.iter().any(|e| matches!(e,
            StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text }, .. } if text == "stray")));
    }
}
