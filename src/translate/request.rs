//! Anthropic Messages request to Chat Completions request.
//!
//! The Chat history is flat where Anthropic nests: one inbound user turn may
//! fan out into several outbound messages, because each `tool_result` block
//! becomes its own `tool`-role message and any text or images around it are
//! flushed as separate `user` messages in original order.

use serde_json::Value;

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessagesRequest, Role, ToolChoice, ToolChoiceAuto,
    ToolChoiceSpecific, ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail, StreamOptions,
};

/// Build the upstream Chat request. The inbound model name is replaced by
/// `target_model`; nothing else about the request depends on the backend.
pub fn anthropic_to_openai(req: &MessagesRequest, target_model: &str) -> ChatCompletionRequest {
    let system = req
        .system
        .as_ref()
        .map(|system| ChatMessage::text("system", system.as_text()));
    let messages = system
        .into_iter()
        .chain(req.messages.iter().flat_map(translate_message))
        .collect();

    let tools = req
        .tools
        .as_deref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| {
            tools
                .iter()
                .map(|tool| ChatTool {
                    tool_type: "function".to_string(),
                    function: ChatFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                    },
                })
                .collect()
        });

    // `stream_options` is rejected on non-streaming requests.
    let streaming = req.is_streaming();

    ChatCompletionRequest {
        model: target_model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        stream: streaming.then_some(true),
        stream_options: streaming.then_some(StreamOptions { include_usage: true }),
        tools,
        tool_choice: req.tool_choice.as_ref().map(translate_tool_choice),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
    }
}

fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();
    match msg.role {
        Role::User => translate_user_turn(&blocks),
        Role::Assistant => vec![translate_assistant_turn(&blocks)],
    }
}

/// Pending text and image parts of a user turn, flushed whenever a tool
/// result interrupts them.
#[derive(Default)]
struct PendingParts(Vec<ContentPart>);

impl PendingParts {
    fn flush_into(&mut self, out: &mut Vec<ChatMessage>) {
        if self.0.is_empty() {
            return;
        }
        let parts = std::mem::take(&mut self.0);
        let content = match parts.as_slice() {
            [ContentPart::Text { text }] => ChatContent::Text(text.clone()),
            _ => ChatContent::Parts(parts),
        };
        out.push(ChatMessage {
            content: Some(content),
            ..ChatMessage::text("user", String::new())
        });
    }
}

fn translate_user_turn(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    let mut pending = PendingParts::default();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => pending.0.push(ContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => {
                if let Some(url) = image_url(source) {
                    pending.0.push(ContentPart::ImageUrl {
                        image_url: ImageUrlDetail { url, detail: None },
                    });
                }
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                pending.flush_into(&mut out);
                out.push(ChatMessage {
                    tool_call_id: Some(tool_use_id.clone()),
                    ..ChatMessage::text("tool", tool_result_to_string(content.as_ref(), *is_error))
                });
            }
            ContentBlock::ToolUse { .. }
            | ContentBlock::Thinking { .. }
            | ContentBlock::RedactedThinking { .. } => {}
        }
    }
    pending.flush_into(&mut out);

    // Chat rejects a turn with no messages at all.
    if out.is_empty() {
        out.push(ChatMessage::text("user", String::new()));
    }
    out
}

fn translate_assistant_turn(blocks: &[ContentBlock]) -> ChatMessage {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: serialize_tool_input(input),
                },
            }),
            _ => {}
        }
    }

    ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(ChatContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    }
}

/// `data:` URI for a base64 source, the URL itself for a url source.
pub(crate) fn image_url(source: &ImageSource) -> Option<String> {
    if let Some(url) = &source.url {
        return Some(url.clone());
    }
    let (media_type, data) = source.media_type.as_ref().zip(source.data.as_ref())?;
    Some(format!("data:{media_type};base64,{data}"))
}

pub(crate) fn serialize_tool_input(input: &Value) -> String {
    serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
}

/// Flatten tool output to text. Non-text blocks are dropped and errors get
/// an `ERROR: ` prefix.
pub(crate) fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let body = match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => "(no content)".to_string(),
    };
    if is_error == Some(true) {
        format!("ERROR: {body}")
    } else {
        body
    }
}

fn translate_tool_choice(choice: &ToolChoice) -> ChatToolChoice {
    match choice {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => {
            ChatToolChoice::String(tool_choice_mode(choice_type).to_string())
        }
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
    }
}

/// `any` forces a call, `none` forbids one, anything else lets the model pick.
pub(crate) fn tool_choice_mode(choice_type: &str) -> &'static str {
    match choice_type {
        "any" => "required",
        "none" => "none",
        _ => "auto",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::*;
    use std::collections::HashMap;

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: Some(1024),
            messages,
            system: None,
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            tools: None,
            tool_choice: None,
            metadata: None,
            stop_sequences: None,
            thinking: None,
            extra: HashMap::default(),
        }
    }

    fn user_text(text: &str) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn test_simple_text_request() {
        let mut req = request(vec![user_text("Hello")]);
        req.system = Some(SystemContent::Text("You are helpful".to_string()));

        let result = anthropic_to_openai(&req, "gpt-4o");

        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.messages.len(), 2); // system + user
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(result.messages[1].role, "user");
        assert_eq!(result.max_tokens, Some(1024));
    }

    #[test]
    fn test_target_model_replaces_client_model() {
        let req = request(vec![user_text("hi")]);
        let result = anthropic_to_openai(&req, "gpt-4.1-mini");
        assert_eq!(result.model, "gpt-4.1-mini");
    }

    #[test]
    fn test_tool_result_splits_into_tool_messages() {
        let req = request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".to_string(),
                    content: Some(ToolResultContent::Text("result 1".to_string())),
                    is_error: None,
                },
                ContentBlock::Text {
                    text: "Now continue".to_string(),
                },
            ]),
        }]);

        let result = anthropic_to_openai(&req, "gpt-4o");

        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "tool");
        assert_eq!(result.messages[0].tool_call_id, Some("toolu_1".to_string()));
        assert_eq!(result.messages[1].role, "user");
    }

    #[test]
    fn test_tool_use_keeps_call_identity() {
        let req = request(vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Text {
                        text: "Reading.".to_string(),
                    },
                    ContentBlock::ToolUse {
                        id: "toolu_9".to_string(),
                        name: "Read".to_string(),
                        input: serde_json::json!({"path": "/etc/hosts"}),
                    },
                ]),
            },
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_9".to_string(),
                    content: None,
                    is_error: Some(true),
                }]),
            },
        ]);

        let result = anthropic_to_openai(&req, "gpt-4o");

        let assistant = &result.messages[0];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].function.arguments, r#"{"path":"/etc/hosts"}"#);

        let tool = &result.messages[1];
        assert_eq!(tool.tool_call_id.as_deref(), Some("toolu_9"));
        match tool.content.as_ref().unwrap() {
            ChatContent::Text(t) => assert_eq!(t, "ERROR: (no content)"),
            ChatContent::Parts(_) => panic!("expected text tool content"),
        }
    }

    #[test]
    fn test_stream_options_only_when_streaming() {
        let mut req = request(vec![user_text("hi")]);
        let non_streaming = anthropic_to_openai(&req, "gpt-4o");
        assert!(non_streaming.stream_options.is_none());
        assert!(non_streaming.stream.is_none());

        let json = serde_json::to_value(&non_streaming).unwrap();
        assert!(json.get("stream_options").is_none());

        req.stream = Some(true);
        let streaming = anthropic_to_openai(&req, "gpt-4o");
        assert_eq!(streaming.stream, Some(true));
        assert!(streaming.stream_options.unwrap().include_usage);
    }

    #[test]
    fn test_tool_choice_mapping() {
        let mut req = request(vec![user_text("hi")]);
        req.tool_choice = Some(ToolChoice::Auto(ToolChoiceAuto {
            choice_type: "any".to_string(),
        }));
        let result = anthropic_to_openai(&req, "gpt-4o");
        assert!(matches!(result.tool_choice, Some(ChatToolChoice::String(ref s)) if s == "required"));

        req.tool_choice = Some(ToolChoice::Specific(ToolChoiceSpecific {
            choice_type: "tool".to_string(),
            name: "Bash".to_string(),
        }));
        let result = anthropic_to_openai(&req, "gpt-4o");
        match result.tool_choice {
            Some(ChatToolChoice::Specific(s)) => assert_eq!(s.function.name, "Bash"),
            other => panic!("unexpected tool choice: {other:?}"),
        }
    }

    #[test]
    fn test_image_block_becomes_data_uri() {
        let req = request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "what is this".to_string(),
                },
                ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".to_string(),
                        media_type: Some("image/png".to_string()),
                        data: Some("AAAA".to_string()),
                        url: None,
                    },
                },
            ]),
        }]);

        let result = anthropic_to_openai(&req, "gpt-4o");
        match result.messages[0].content.as_ref().unwrap() {
            ChatContent::Parts(parts) => match &parts[1] {
                ContentPart::ImageUrl { image_url } => {
                    assert_eq!(image_url.url, "data:image/png;base64,AAAA");
                }
                ContentPart::Text { .. } => panic!("expected image part"),
            },
            ChatContent::Text(_) => panic!("expected multi-part content"),
        }
    }
}
