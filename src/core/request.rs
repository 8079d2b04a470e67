//! C3 — the Anthropic request → OpenAI request converter (spec §4.3).

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use super::error_map::BridgeError;
use super::model::{
    AnthropicRequest, ContentBlock, MessageContent, OpenAiContentPart, OpenAiFunctionCall,
    OpenAiFunctionDef, OpenAiImageUrl, OpenAiMessage, OpenAiMessageContent, OpenAiRequest,
    OpenAiTool, OpenAiToolCall, ReasoningConfig, Role, ToolChoice,
};
use super::reasoning::{self, ModelFamily};
use super::router::Resolution;

/// Convert a fully-parsed [`AnthropicRequest`] into an [`OpenAiRequest`] ready
/// to send to the resolved upstream backend.
pub fn convert(req: &AnthropicRequest, resolution: &Resolution) -> Result<OpenAiRequest, BridgeError> {
    let max_tokens = req
        .max_tokens
        .ok_or_else(|| BridgeError::InvalidRequest("max_tokens is required".to_string()))?;

    validate_tool_references(&req.messages)?;

    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        let rendered = system.render();
        if !rendered.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(OpenAiMessageContent::Text(rendered)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    for message in &req.messages {
        convert_message(message, resolution, &mut messages)?;
    }

    let tools: Vec<OpenAiTool> = req
        .tools
        .iter()
        .map(|t| OpenAiTool {
            tool_type: "function",
            function: OpenAiFunctionDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect();

    let tool_choice = req.tool_choice.as_ref().map(convert_tool_choice);

    if matches!(&req.tool_choice, Some(ToolChoice::Tool { .. }) | Some(ToolChoice::Any))
        && req.tools.is_empty()
    {
        return Err(BridgeError::InvalidRequest(
            "tool_choice requires at least one declared tool".to_string(),
        ));
    }

    let use_max_completion_tokens = reasoning::uses_max_completion_tokens(resolution.family);

    let extra_body = resolution.reasoning.as_ref().map(reasoning_extra_body);

    Ok(OpenAiRequest {
        model: resolution.target_model.to_string(),
        messages,
        max_tokens: if use_max_completion_tokens { None } else { Some(max_tokens) },
        max_completion_tokens: if use_max_completion_tokens { Some(max_tokens) } else { None },
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        stream: req.stream,
        tools,
        tool_choice,
        extra_body,
    })
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({ "type": "function", "function": { "name": name } }),
    }
}

fn reasoning_extra_body(config: &ReasoningConfig) -> Value {
    match config {
        ReasoningConfig::OpenAiEffort { effort, exclude } => {
            let mut reasoning = json!({ "effort": effort.as_str() });
            if *exclude {
                reasoning["exclude"] = json!(true);
            }
            json!({ "reasoning": reasoning })
        }
        ReasoningConfig::AnthropicThinking { budget } => {
            json!({ "thinking": { "type": "enabled", "budget": budget } })
        }
        ReasoningConfig::GeminiThinking { budget } => {
            json!({ "generation_config": { "thinking_config": { "budget": budget } } })
        }
    }
}

/// Enforce spec §3's invariants that every `tool_use.id` is unique within a
/// request and every `tool_result.tool_use_id` resolves to a `tool_use` seen
/// earlier in the message order.
fn validate_tool_references(messages: &[super::model::Message]) -> Result<(), BridgeError> {
    let mut seen_tool_use_ids: HashSet<String> = HashSet::new();

    for message in messages {
        for block in message.content.as_blocks() {
            match block {
                ContentBlock::ToolUse { id, .. } => {
                    if !seen_tool_use_ids.insert(id.clone()) {
                        return Err(BridgeError::InvalidRequest(format!(
                            "duplicate tool_use id in request: {id}"
                        )));
                    }
                }
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    if !seen_tool_use_ids.contains(&tool_use_id) {
                        return Err(BridgeError::InvalidRequest(format!(
                            "tool_result references unknown tool_use_id: {tool_use_id}"
                        )));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(())
}

/// Flatten one Anthropic [`Message`] into zero or more OpenAI messages,
/// splitting `tool_result` blocks into their own `role: "tool"` messages and
/// `tool_use` blocks into `tool_calls` entries on the assistant message.
fn convert_message(
    message: &super::model::Message,
    resolution: &Resolution,
    out: &mut Vec<OpenAiMessage>,
) -> Result<(), BridgeError> {
    let role_str = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let blocks = message.content.as_blocks();

    let mut parts: Vec<OpenAiContentPart> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

    macro_rules! flush_parts {
        () => {
            if !parts.is_empty() || !tool_calls.is_empty() {
                let content = if parts.is_empty() {
                    None
                } else if parts.len() == 1 {
                    match parts.remove(0) {
                        OpenAiContentPart::Text { text } => Some(OpenAiMessageContent::Text(text)),
                        other => Some(OpenAiMessageContent::Parts(vec![other])),
                    }
                } else {
                    Some(OpenAiMessageContent::Parts(std::mem::take(&mut parts)))
                };
                out.push(OpenAiMessage {
                    role: role_str.to_string(),
                    content,
                    tool_calls: if tool_calls.is_empty() { None } else { Some(std::mem::take(&mut tool_calls)) },
                    tool_call_id: None,
                    name: None,
                });
            }
        };
    }

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(OpenAiContentPart::Text { text }),
            ContentBlock::Image { source } => {
                let url = format!("data:{};base64,{}", source.media_type, source.data);
                parts.push(OpenAiContentPart::ImageUrl { image_url: OpenAiImageUrl { url } });
            }
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = serialize_tool_arguments(&name, &input, resolution.tool_arg_dialect);
                tool_calls.push(OpenAiToolCall {
                    id,
                    call_type: "function",
                    function: OpenAiFunctionCall { name, arguments },
                });
            }
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                // tool_result ends the current user turn's aggregation and
                // becomes its own message, preserving block order.
                flush_parts!();
                let mut rendered = content.map(|c| c.render()).unwrap_or_default();
                if is_error {
                    rendered = format!("[error] {rendered}");
                }
                out.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(OpenAiMessageContent::Text(rendered)),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                    name: None,
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {
                // Thinking blocks are response-only; dropped on the request side.
            }
        }
    }

    flush_parts!();
    Ok(())
}

/// Serialize a tool_use's `input` to a JSON string, renaming argument keys to
/// the upstream dialect when a mapping is configured for this tool name
/// (spec §4.3 step 7).
fn serialize_tool_arguments(
    tool_name: &str,
    input: &Value,
    dialect: Option<&HashMap<String, HashMap<String, String>>>,
) -> String {
    let mapping = dialect.and_then(|d| d.get(tool_name));
    let Some(mapping) = mapping else {
        return input.to_string();
    };

    let Some(obj) = input.as_object() else {
        return input.to_string();
    };

    let mut rewritten = serde_json::Map::with_capacity(obj.len());
    for (key, value) in obj {
        let upstream_key = mapping.get(key).cloned().unwrap_or_else(|| key.clone());
        rewritten.insert(upstream_key, value.clone());
    }
    Value::Object(rewritten).to_string()
}
