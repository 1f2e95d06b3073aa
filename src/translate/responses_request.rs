//! Translate Anthropic Messages API requests into ChatGPT Responses requests.
//!
//! The Responses schema has no per-message tool call list: every `tool_use`
//! becomes its own `function_call` item and every `tool_result` its own
//! `function_call_output` item, emitted in content order so each output
//! follows the call it answers.

use super::anthropic_types::{ContentBlock, MessagesRequest, Role, ToolChoice};
use super::request::{image_url, serialize_tool_input, tool_choice_mode, tool_result_to_string};
use super::responses_types::{
    InputContent, InputItem, ReasoningConfig, ResponsesRequest, ResponsesTool,
};

/// Translate an Anthropic request into a Responses request for `target_model`.
///
/// The backend only serves streams, so `stream` is always set; sampling and
/// token-limit fields are not forwarded because the backend rejects them.
pub fn anthropic_to_responses(req: &MessagesRequest, target_model: &str) -> ResponsesRequest {
    let mut input = Vec::new();

    for msg in &req.messages {
        let blocks = msg.content.blocks();
        match msg.role {
            Role::User => push_user_items(&blocks, &mut input),
            Role::Assistant => push_assistant_items(&blocks, &mut input),
        }
    }

    let tools = req
        .tools
        .iter()
        .flatten()
        .map(|t| ResponsesTool {
            tool_type: "function".to_string(),
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.input_schema.clone(),
        })
        .collect::<Vec<_>>();

    let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
        ToolChoice::Auto(auto) => serde_json::Value::from(tool_choice_mode(&auto.choice_type)),
        ToolChoice::Specific(specific) => {
            serde_json::json!({ "type": "function", "name": specific.name })
        }
    });

    let reasoning = reasoning_from_thinking(req.thinking.as_ref());
    // Without server-side storage, reasoning only carries across turns in
    // its encrypted form.
    let include = match reasoning {
        Some(_) => vec!["reasoning.encrypted_content".to_string()],
        None => Vec::new(),
    };

    ResponsesRequest {
        model: target_model.to_string(),
        instructions: req.system_text(),
        input,
        tool_choice: tool_choice.or_else(|| (!tools.is_empty()).then(|| "auto".into())),
        tools,
        parallel_tool_calls: true,
        stream: true,
        store: false,
        include,
        reasoning,
    }
}

/// Map an Anthropic `thinking` block onto a reasoning effort. Only
/// `{"type": "enabled"}` asks for reasoning; the token budget picks the tier.
fn reasoning_from_thinking(thinking: Option<&serde_json::Value>) -> Option<ReasoningConfig> {
    let thinking = thinking?;
    if thinking.get("type").and_then(|t| t.as_str()) != Some("enabled") {
        return None;
    }
    let effort = match thinking.get("budget_tokens").and_then(|b| b.as_u64()) {
        Some(budget) if budget < 4096 => "low",
        Some(budget) if budget >= 16384 => "high",
        _ => "medium",
    };
    Some(ReasoningConfig {
        effort: effort.to_string(),
        summary: Some("auto".to_string()),
    })
}

fn push_user_items(blocks: &[ContentBlock], input: &mut Vec<InputItem>) {
    let mut content: Vec<InputContent> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => content.push(InputContent::InputText { text: text.clone() }),
            ContentBlock::Image { source } => {
                if let Some(url) = image_url(source) {
                    content.push(InputContent::InputImage { image_url: url });
                }
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content: result,
                is_error,
            } => {
                flush_message("user", &mut content, input);
                input.push(InputItem::FunctionCallOutput {
                    call_id: tool_use_id.clone(),
                    output: tool_result_to_string(result.as_ref(), *is_error),
                });
            }
            ContentBlock::ToolUse { .. }
            | ContentBlock::Thinking { .. }
            | ContentBlock::RedactedThinking { .. } => {}
        }
    }

    flush_message("user", &mut content, input);
}

fn push_assistant_items(blocks: &[ContentBlock], input: &mut Vec<InputItem>) {
    let mut content: Vec<InputContent> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    content.push(InputContent::OutputText { text: text.clone() });
                }
            }
            ContentBlock::ToolUse { id, name, input: args } => {
                flush_message("assistant", &mut content, input);
                input.push(InputItem::FunctionCall {
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: serialize_tool_input(args),
                });
            }
            ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Thinking { .. }
            | ContentBlock::RedactedThinking { .. } => {}
        }
    }

    flush_message("assistant", &mut content, input);
}

fn flush_message(role: &str, content: &mut Vec<InputContent>, input: &mut Vec<InputItem>) {
    if content.is_empty() {
        return;
    }
    input.push(InputItem::Message {
        role: role.to_string(),
        content: std::mem::take(content),
    });
}
