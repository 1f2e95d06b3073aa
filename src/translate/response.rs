use super::anthropic_types::{
    new_message_id, ErrorResponse, MessagesResponse, ResponseContentBlock, Usage,
};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use super::responses_types::{OutputContent, OutputItem, ResponseObject};

/// Translate an OpenAI Chat Completion response into an Anthropic Messages response.
/// Pure function: `spoof_model` is the model name reported to the client.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse, spoof_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                content.push(ResponseContentBlock::ToolUse {
                    id: tool_use_id(&tc.id),
                    name: tc.function.name.clone(),
                    input: parse_tool_arguments(&tc.function.arguments),
                });
            }
        }
    }

    // Claude clients expect non-empty content
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref()));

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    });

    let id = if resp.id.is_empty() {
        new_message_id()
    } else {
        format!("msg_{}", resp.id.trim_start_matches("chatcmpl-"))
    };

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: spoof_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Translate the final object of a Responses stream into an Anthropic Messages response.
pub fn responses_to_anthropic(
    resp: &ResponseObject,
    incomplete: bool,
    spoof_model: &str,
) -> MessagesResponse {
    let mut text = String::new();
    let mut tool_uses = Vec::new();

    for item in &resp.output {
        match item {
            OutputItem::Message { content, .. } => {
                for part in content {
                    match part {
                        OutputContent::OutputText { text: t } => text.push_str(t),
                        OutputContent::Refusal { refusal } => text.push_str(refusal),
                        OutputContent::Other => {}
                    }
                }
            }
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => tool_uses.push(ResponseContentBlock::ToolUse {
                id: tool_use_id(call_id),
                name: name.clone(),
                input: parse_tool_arguments(arguments),
            }),
            OutputItem::Reasoning { .. } | OutputItem::Other => {}
        }
    }

    let stop_reason = responses_stop_reason(!tool_uses.is_empty(), incomplete_reason(resp, incomplete));

    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ResponseContentBlock::Text { text });
    }
    content.extend(tool_uses);
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    });

    let id = if resp.id.is_empty() {
        new_message_id()
    } else {
        format!("msg_{}", resp.id.trim_start_matches("resp_"))
    };

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: spoof_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Map an OpenAI finish_reason to an Anthropic stop_reason.
pub fn map_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("tool_calls" | "function_call") => "tool_use",
        Some("length") => "max_tokens",
        _ => "end_turn",
    }
}

/// Stop reason for a Responses turn: tool calls win over a length cut-off.
pub fn responses_stop_reason(saw_tool_call: bool, incomplete_reason: Option<&str>) -> &'static str {
    if saw_tool_call {
        "tool_use"
    } else if incomplete_reason == Some("max_output_tokens") {
        "max_tokens"
    } else {
        "end_turn"
    }
}

fn incomplete_reason(resp: &ResponseObject, incomplete: bool) -> Option<&str> {
    if !incomplete {
        return None;
    }
    resp.incomplete_details
        .as_ref()
        .and_then(|d| d.reason.as_deref())
}

/// Parse streamed or buffered tool arguments; empty or absent arguments are `{}`.
pub fn parse_tool_arguments(arguments: &str) -> serde_json::Value {
    if arguments.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
}

/// Upstream tool call ids are kept; a missing one is replaced by a fresh id.
pub fn tool_use_id(upstream_id: &str) -> String {
    if upstream_id.is_empty() {
        format!("toolu_{}", uuid::Uuid::new_v4().simple())
    } else {
        upstream_id.to_string()
    }
}

/// Build the client error for a non-2xx Chat Completions response. The kind
/// follows the status; the message is the upstream's own when it sent one.
pub fn chat_error_to_anthropic(status: u16, body: &str) -> ErrorResponse {
    let message = serde_json::from_str::<ChatErrorResponse>(body)
        .map(|err| err.error.message)
        .unwrap_or_else(|_| format!("Upstream returned status {status}"));
    ErrorResponse::for_status(status, message)
}
