//! C4 — the non-streaming OpenAI response → Anthropic response converter
//! (spec §4.4).

use serde_json::Value;
use uuid::Uuid;

use super::model::{
    AnthropicResponse, AnthropicUsage, ContentBlock, OpenAiChoice, OpenAiResponse,
    OpenAiResponseToolCall,
};

/// Convert a fully-buffered upstream response into the Anthropic `Message`
/// shape. `requested_model` is echoed back verbatim (spec §4.4 step 1) rather
/// than the upstream's own `model` field, since clients requested the
/// Anthropic-side name. `exclude_thinking` mirrors the resolved reasoning
/// config's `exclude` flag (spec §4.4: `usage.thinking_tokens` is only
/// populated "when the reasoning config did not set exclude").
pub fn convert(upstream: OpenAiResponse, requested_model: &str, exclude_thinking: bool) -> AnthropicResponse {
    let choice = upstream.choices.into_iter().next();

    let (content, stop_reason) = match choice {
        Some(choice) => content_blocks(&choice),
        None => (vec![], Some("end_turn".to_string())),
    };

    let usage = upstream
        .usage
        .map(|u| AnthropicUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            thinking_tokens: if exclude_thinking { None } else { u.reasoning_tokens },
        })
        .unwrap_or(AnthropicUsage { input_tokens: 0, output_tokens: 0, thinking_tokens: None });

    AnthropicResponse {
        id: upstream.id.unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple())),
        response_type: "message",
        role: "assistant",
        model: requested_model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

fn content_blocks(choice: &OpenAiChoice) -> (Vec<ContentBlock>, Option<String>) {
    let mut blocks = Vec::new();

    if let Some(text) = &choice.message.content {
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text: text.clone() });
        }
    }

    let mut saw_malformed_tool_call = false;
    for call in &choice.message.tool_calls {
        match tool_use_block(call) {
            Ok(block) => blocks.push(block),
            Err(block) => {
                saw_malformed_tool_call = true;
                blocks.push(block);
            }
        }
    }

    let stop_reason = if saw_malformed_tool_call {
        Some("error".to_string())
    } else {
        Some(map_stop_reason(choice.finish_reason.as_deref(), !choice.message.tool_calls.is_empty()))
    };

    (blocks, stop_reason)
}

/// Parse a tool call's `arguments` JSON string into a `tool_use` block. On
/// malformed JSON, falls back to a `{"_raw": "..."}` input block instead of
/// dropping the call (spec §4.4 step 4 / §8 boundary behavior).
fn tool_use_block(call: &OpenAiResponseToolCall) -> Result<ContentBlock, ContentBlock> {
    match serde_json::from_str::<Value>(&call.function.arguments) {
        Ok(input) => Ok(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        }),
        Err(_) => Err(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: serde_json::json!({ "_raw": call.function.arguments }),
        }),
    }
}

fn map_stop_reason(finish_reason: Option<&str>, has_tool_calls: bool) -> String {
    match finish_reason {
        Some("tool_calls") => "tool_use".to_string(),
        Some("length") => "max_tokens".to_string(),
        Some("content_filter") => "stop_sequence".to_string(),
        Some("stop") | None => {
            if has_tool_calls {
                "tool_use".to_string()
            } else {
                "end_turn".to_string()
            }
        }
        Some(_) => "end_turn".to_string(),
    }
}
