//! C5 — the streaming response converter: reassembles an OpenAI SSE delta
//! stream into Anthropic's multi-event SSE stream (spec §4.5). This is the
//! hard piece: an explicit state-transition table keyed on the shape of the
//! incoming delta, not a callback per event.
//!
//! Deliberately synchronous and transport-agnostic — it consumes one
//! [`OpenAiChunk`] at a time and returns the [`SseEvent`]s to write, so the
//! transition table can be unit-tested without an async runtime. The HTTP
//! layer drives it with `futures_util::stream::unfold` over the upstream
//! byte stream.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::warn;

use super::error_map::BridgeError;
use super::model::{OpenAiChunk, OpenAiChunkChoice};

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    MessageStart(Value),
    ContentBlockStart(Value),
    ContentBlockDelta(Value),
    ContentBlockStop(Value),
    MessageDelta(Value),
    MessageStop,
    Error(Value),
}

impl SseEvent {
    pub fn render(&self) -> String {
        match self {
            SseEvent::MessageStart(v) => frame("message_start", v),
            SseEvent::ContentBlockStart(v) => frame("content_block_start", v),
            SseEvent::ContentBlockDelta(v) => frame("content_block_delta", v),
            SseEvent::ContentBlockStop(v) => frame("content_block_stop", v),
            SseEvent::MessageDelta(v) => frame("message_delta", v),
            SseEvent::MessageStop => frame("message_stop", &json!({ "type": "message_stop" })),
            SseEvent::Error(v) => frame("error", v),
        }
    }
}

fn frame(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

#[derive(Debug, Clone)]
enum OpenBlock {
    Text { index: u32 },
    Thinking { index: u32 },
    ToolUse { index: u32, upstream_call_index: usize },
}

impl OpenBlock {
    fn index(&self) -> u32 {
        match self {
            OpenBlock::Text { index } | OpenBlock::Thinking { index } | OpenBlock::ToolUse { index, .. } => *index,
        }
    }
}

struct ToolCallState {
    block_index: u32,
    /// upstream-key → client-key rename table for this tool, `None` when no
    /// dialect mapping is registered for it.
    rename: Option<HashMap<String, String>>,
    carry: String,
}

/// A `tool_calls` fragment seen before its `id` arrived — buffered rather than
/// dropped (spec §8: "buffered until `id` arrives; if stream ends without
/// one, drop with warning").
#[derive(Default)]
struct PendingToolCall {
    name: Option<String>,
    arguments: String,
}

/// Owns the single [`StreamState`] for one in-flight request (spec §3).
pub struct StreamMachine {
    message_id: String,
    model: String,
    exclude_thinking: bool,
    /// Per-tool-name upstream_key → client_key rename table, inverted from
    /// the route's client_key → upstream_key `tool_arg_dialect` (spec §4.5
    /// tie-break: the response direction applies the inverse).
    dialect_by_tool: HashMap<String, HashMap<String, String>>,

    message_started: bool,
    finished: bool,
    next_index: u32,
    open_blocks: Vec<OpenBlock>,
    text_block_index: Option<u32>,
    thinking_block_index: Option<u32>,
    tool_calls: HashMap<usize, ToolCallState>,
    pending_tool_calls: HashMap<usize, PendingToolCall>,

    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    delta_count: u64,
    stop_reason: Option<String>,
}

impl StreamMachine {
    pub fn new(
        message_id: String,
        model: String,
        tool_arg_dialect: Option<&HashMap<String, HashMap<String, String>>>,
        exclude_thinking: bool,
    ) -> Self {
        Self {
            message_id,
            model,
            exclude_thinking,
            dialect_by_tool: tool_arg_dialect.map(invert_dialect).unwrap_or_default(),
            message_started: false,
            finished: false,
            next_index: 0,
            open_blocks: Vec::new(),
            text_block_index: None,
            thinking_block_index: None,
            tool_calls: HashMap::new(),
            pending_tool_calls: HashMap::new(),
            input_tokens: None,
            output_tokens: None,
            delta_count: 0,
            stop_reason: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Process one upstream chunk, returning the Anthropic events it produces.
    pub fn on_chunk(&mut self, chunk: OpenAiChunk) -> Vec<SseEvent> {
        if self.finished {
            return vec![];
        }

        if let Some(usage) = &chunk.usage {
            self.input_tokens = Some(usage.prompt_tokens);
            self.output_tokens = Some(usage.completion_tokens);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return vec![];
        };
        // Other choices are dropped per spec — only choices[0] is processed.

        let mut events = Vec::new();
        self.ensure_message_started(&mut events);

        let finish_reason = choice.finish_reason.clone();
        self.process_delta(&choice, &mut events);

        if let Some(reason) = finish_reason {
            self.terminate(Some(reason.as_str()), &mut events);
        }

        events
    }

    /// The `[DONE]` sentinel with no prior `finish_reason` chunk.
    pub fn on_done(&mut self) -> Vec<SseEvent> {
        if self.finished {
            return vec![];
        }
        let mut events = Vec::new();
        self.ensure_message_started(&mut events);
        self.terminate(Some("stop"), &mut events);
        events
    }

    /// Client disconnected mid-stream (spec §4.6).
    pub fn on_cancel(&mut self) -> Vec<SseEvent> {
        if self.finished || !self.message_started {
            self.finished = true;
            return vec![];
        }
        let mut events = Vec::new();
        self.close_open_blocks(&mut events);
        self.warn_unresolved_tool_calls();
        events.push(SseEvent::MessageDelta(json!({
            "type": "message_delta",
            "delta": { "stop_reason": "end_turn" },
            "usage": { "output_tokens": self.output_tokens.unwrap_or(self.delta_count) },
        })));
        events.push(SseEvent::MessageStop);
        self.finished = true;
        events
    }

    /// An upstream/transport failure (spec §4.7).
    pub fn on_error(&mut self, error: &BridgeError) -> Vec<SseEvent> {
        if self.finished {
            return vec![];
        }
        if !self.message_started {
            self.finished = true;
            self.warn_unresolved_tool_calls();
            return vec![SseEvent::Error(error.to_envelope())];
        }
        let mut events = Vec::new();
        self.close_open_blocks(&mut events);
        self.warn_unresolved_tool_calls();
        events.push(SseEvent::MessageDelta(json!({
            "type": "message_delta",
            "delta": { "stop_reason": "error" },
            "usage": { "output_tokens": self.output_tokens.unwrap_or(self.delta_count) },
        })));
        events.push(SseEvent::MessageStop);
        self.finished = true;
        events
    }

    fn ensure_message_started(&mut self, events: &mut Vec<SseEvent>) {
        if self.message_started {
            return;
        }
        self.message_started = true;
        events.push(SseEvent::MessageStart(json!({
            "type": "message_start",
            "message": {
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": Value::Null,
                "usage": { "input_tokens": self.input_tokens.unwrap_or(0), "output_tokens": 0 },
            }
        })));
    }

    fn process_delta(&mut self, choice: &OpenAiChunkChoice, events: &mut Vec<SseEvent>) {
        let delta = &choice.delta;

        if let Some(text) = &delta.content {
            if !text.is_empty() {
                let index = self.open_text_block(events);
                self.delta_count += 1;
                events.push(SseEvent::ContentBlockDelta(json!({
                    "type": "content_block_delta",
                    "index": index,
                    "delta": { "type": "text_delta", "text": text },
                })));
            }
        }

        if let Some(thinking) = &delta.reasoning {
            if !thinking.is_empty() && !self.exclude_thinking {
                let index = self.open_thinking_block(events);
                self.delta_count += 1;
                events.push(SseEvent::ContentBlockDelta(json!({
                    "type": "content_block_delta",
                    "index": index,
                    "delta": { "type": "thinking_delta", "thinking": thinking },
                })));
            }
        }

        if let Some(tool_calls) = &delta.tool_calls {
            for call in tool_calls {
                self.process_tool_call_delta(call, events);
            }
        }
    }

    fn open_text_block(&mut self, events: &mut Vec<SseEvent>) -> u32 {
        if let Some(index) = self.text_block_index {
            return index;
        }
        let index = self.allocate_index();
        self.text_block_index = Some(index);
        self.open_blocks.push(OpenBlock::Text { index });
        events.push(SseEvent::ContentBlockStart(json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "text", "text": "" },
        })));
        index
    }

    fn open_thinking_block(&mut self, events: &mut Vec<SseEvent>) -> u32 {
        if let Some(index) = self.thinking_block_index {
            return index;
        }
        let index = self.allocate_index();
        self.thinking_block_index = Some(index);
        self.open_blocks.push(OpenBlock::Thinking { index });
        events.push(SseEvent::ContentBlockStart(json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "thinking", "thinking": "" },
        })));
        index
    }

    fn process_tool_call_delta(&mut self, call: &super::model::OpenAiToolCallDelta, events: &mut Vec<SseEvent>) {
        if !self.tool_calls.contains_key(&call.index) {
            let Some(id) = &call.id else {
                // No id yet: buffer this fragment's name/arguments under its
                // upstream call index until a later fragment carries the id
                // (spec §8). Dropped-with-warning only happens if the stream
                // ends with no id ever arriving (see `warn_unresolved_tool_calls`).
                let pending = self.pending_tool_calls.entry(call.index).or_default();
                if let Some(function) = &call.function {
                    if let Some(name) = &function.name {
                        pending.name = Some(name.clone());
                    }
                    if let Some(arguments) = &function.arguments {
                        pending.arguments.push_str(arguments);
                    }
                }
                return;
            };

            let pending = self.pending_tool_calls.remove(&call.index);
            let name = call
                .function
                .as_ref()
                .and_then(|f| f.name.clone())
                .or_else(|| pending.as_ref().and_then(|p| p.name.clone()))
                .unwrap_or_default();
            let index = self.allocate_index();
            self.open_blocks.push(OpenBlock::ToolUse { index, upstream_call_index: call.index });
            let rename = self.dialect_by_tool.get(&name).cloned();
            self.tool_calls.insert(call.index, ToolCallState { block_index: index, rename, carry: String::new() });
            events.push(SseEvent::ContentBlockStart(json!({
                "type": "content_block_start",
                "index": index,
                "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} },
            })));

            let mut buffered_arguments = pending.map(|p| p.arguments).unwrap_or_default();
            if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.clone()) {
                buffered_arguments.push_str(&arguments);
            }
            if !buffered_arguments.is_empty() {
                self.emit_tool_argument_fragment(call.index, buffered_arguments, events);
            }
            return;
        }

        let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.clone()) else {
            return;
        };
        if arguments.is_empty() {
            return;
        }
        self.emit_tool_argument_fragment(call.index, arguments, events);
    }

    fn emit_tool_argument_fragment(&mut self, upstream_call_index: usize, arguments: String, events: &mut Vec<SseEvent>) {
        let state = self.tool_calls.get_mut(&upstream_call_index).expect("opened above");
        let index = state.block_index;
        let rename = state.rename.clone();
        let emitted = match &rename {
            Some(rename) => rewrite_fragment(&mut state.carry, &arguments, rename, false),
            None => arguments,
        };
        if emitted.is_empty() {
            return;
        }
        self.delta_count += 1;
        events.push(SseEvent::ContentBlockDelta(json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "input_json_delta", "partial_json": emitted },
        })));
    }

    /// Logs and discards any `tool_calls` fragments still waiting on an `id`
    /// when the stream reaches a terminal state (spec §8 boundary behavior).
    fn warn_unresolved_tool_calls(&mut self) {
        for (upstream_call_index, pending) in self.pending_tool_calls.drain() {
            warn!(
                upstream_call_index,
                name = pending.name.as_deref().unwrap_or("<unknown>"),
                "tool_calls fragment never received an id before the stream ended; dropping"
            );
        }
    }

    fn close_open_blocks(&mut self, events: &mut Vec<SseEvent>) {
        let blocks = std::mem::take(&mut self.open_blocks);
        for block in &blocks {
            if let OpenBlock::ToolUse { upstream_call_index, .. } = block {
                if let Some(state) = self.tool_calls.get_mut(upstream_call_index) {
                    if !state.carry.is_empty() {
                        let rename = state.rename.clone();
                        let flushed = match &rename {
                            Some(rename) => rewrite_fragment(&mut state.carry, "", rename, true),
                            None => std::mem::take(&mut state.carry),
                        };
                        if !flushed.is_empty() {
                            self.delta_count += 1;
                            events.push(SseEvent::ContentBlockDelta(json!({
                                "type": "content_block_delta",
                                "index": block.index(),
                                "delta": { "type": "input_json_delta", "partial_json": flushed },
                            })));
                        }
                    }
                }
            }
            events.push(SseEvent::ContentBlockStop(json!({
                "type": "content_block_stop",
                "index": block.index(),
            })));
        }
    }

    fn terminate(&mut self, finish_reason: Option<&str>, events: &mut Vec<SseEvent>) {
        self.close_open_blocks(events);
        self.warn_unresolved_tool_calls();
        let has_tool_calls = !self.tool_calls.is_empty();
        let mapped = map_finish_reason(finish_reason, has_tool_calls);
        self.stop_reason = Some(mapped.clone());
        events.push(SseEvent::MessageDelta(json!({
            "type": "message_delta",
            "delta": { "stop_reason": mapped },
            "usage": { "output_tokens": self.output_tokens.unwrap_or(self.delta_count) },
        })));
        events.push(SseEvent::MessageStop);
        self.finished = true;
    }

    fn allocate_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

fn map_finish_reason(finish_reason: Option<&str>, has_tool_calls: bool) -> String {
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

fn invert_dialect(dialect: &HashMap<String, HashMap<String, String>>) -> HashMap<String, HashMap<String, String>> {
    dialect
        .iter()
        .map(|(tool, mapping)| {
            let inverted: HashMap<String, String> =
                mapping.iter().map(|(client_key, upstream_key)| (upstream_key.clone(), client_key.clone())).collect();
            (tool.clone(), inverted)
        })
        .collect()
}

/// Rewrite `"<upstream_key>":` occurrences to `"<client_key>":` inside a
/// streamed JSON-argument fragment, carrying over the trailing bytes that
/// might be a split key literal (spec §4.5 tie-break on `input_json_delta`
/// rewriting). When `flush` is true, the entire carry is processed with
/// nothing held back — used when the block is closing and no further
/// fragments will arrive.
///
/// The replace runs over the *whole* accumulated buffer before any bytes are
/// held back, so a key literal split across two fragments (e.g. `{"prom` /
/// `pt":"ls"}`) is reassembled before matching instead of being cut midway.
fn rewrite_fragment(carry: &mut String, fragment: &str, rename: &HashMap<String, String>, flush: bool) -> String {
    carry.push_str(fragment);

    let mut replaced = carry.clone();
    for (upstream_key, client_key) in rename {
        let from = format!("\"{upstream_key}\":");
        let to = format!("\"{client_key}\":");
        replaced = replaced.replace(&from, &to);
    }

    let max_len = rename.keys().map(|k| k.len() + 3).max().unwrap_or(0); // `"key":`
    let safe_len = if flush { replaced.len() } else { replaced.len().saturating_sub(max_len.saturating_sub(1)) };

    let mut boundary = safe_len;
    while boundary > 0 && !replaced.is_char_boundary(boundary) {
        boundary -= 1;
    }

    let processed = replaced[..boundary].to_string();
    *carry = replaced[boundary..].to_string();
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{OpenAiDelta, OpenAiFunctionDelta, OpenAiToolCallDelta};

    fn text_chunk(text: &str, finish_reason: Option<&str>) -> OpenAiChunk {
        OpenAiChunk {
            id: Some("chatcmpl-1".into()),
            model: Some("gpt-4o-mini".into()),
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta { content: Some(text.to_string()), ..Default::default() },
                finish_reason: finish_reason.map(String::from),
            }],
            usage: None,
        }
    }

    #[test]
    fn scenario_a_plain_text_streaming_event_sequence() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        let mut kinds = Vec::new();

        for event in machine.on_chunk(text_chunk("Hello", None)) {
            kinds.push(event_kind(&event));
        }
        for event in machine.on_chunk(text_chunk(" there", None)) {
            kinds.push(event_kind(&event));
        }
        for event in machine.on_chunk(text_chunk("", Some("stop"))) {
            kinds.push(event_kind(&event));
        }

        assert_eq!(
            kinds,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(machine.is_finished());
    }

    #[test]
    fn scenario_b_tool_call_streamed_in_fragments() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);

        let open = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: Some("call_1".into()),
                        function: Some(OpenAiFunctionDelta { name: Some("get_weather".into()), arguments: Some("".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let frag1 = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(OpenAiFunctionDelta { name: None, arguments: Some("{\"loc".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let frag2 = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(OpenAiFunctionDelta { name: None, arguments: Some("ation\":\"NYC\"}".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let done = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice { index: 0, delta: OpenAiDelta::default(), finish_reason: Some("tool_calls".into()) }],
            usage: None,
        };

        let mut all_kinds = Vec::new();
        for chunk in [open, frag1, frag2, done] {
            for event in machine.on_chunk(chunk) {
                all_kinds.push(event_kind(&event));
            }
        }

        assert_eq!(
            all_kinds,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn scenario_d_cancellation_mid_stream_closes_open_blocks() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        machine.on_chunk(text_chunk("a", None));
        machine.on_chunk(text_chunk("b", None));
        machine.on_chunk(text_chunk("c", None));

        let events = machine.on_cancel();
        let kinds: Vec<_> = events.iter().map(event_kind).collect();
        assert_eq!(kinds, vec!["content_block_stop", "message_delta", "message_stop"]);

        let SseEvent::MessageDelta(value) = &events[1] else { panic!("expected message_delta") };
        assert_eq!(value["usage"]["output_tokens"], 3);
        assert_eq!(value["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn error_before_message_start_emits_single_error_event() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        let events = machine.on_error(&BridgeError::RateLimit);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SseEvent::Error(_)));
    }

    #[test]
    fn error_after_message_start_closes_blocks_before_terminal_events() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        machine.on_chunk(text_chunk("partial", None));
        let events = machine.on_error(&BridgeError::Api("boom".into()));
        let kinds: Vec<_> = events.iter().map(event_kind).collect();
        assert_eq!(kinds, vec!["content_block_stop", "message_delta", "message_stop"]);
    }

    #[test]
    fn duplicate_finish_reason_chunks_only_terminate_once() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        machine.on_chunk(text_chunk("hi", Some("stop")));
        let second = machine.on_chunk(text_chunk("", Some("stop")));
        assert!(second.is_empty());
    }

    #[test]
    fn content_filter_finish_reason_maps_to_stop_sequence() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        machine.on_chunk(text_chunk("partial", None));
        let events = machine.on_chunk(text_chunk("", Some("content_filter")));
        let SseEvent::MessageDelta(value) = events.iter().find(|e| matches!(e, SseEvent::MessageDelta(_))).unwrap() else {
            unreachable!()
        };
        assert_eq!(value["delta"]["stop_reason"], "stop_sequence");
    }

    #[test]
    fn done_sentinel_without_finish_reason_triggers_terminal_sequence() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        machine.on_chunk(text_chunk("hi", None));
        let events = machine.on_done();
        let kinds: Vec<_> = events.iter().map(event_kind).collect();
        assert_eq!(kinds, vec!["content_block_stop", "message_delta", "message_stop"]);
    }

    #[test]
    fn tool_arg_dialect_rewrite_survives_fragment_boundary() {
        let mut dialect: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut inner = HashMap::new();
        inner.insert("command".to_string(), "prompt".to_string());
        dialect.insert("Bash".to_string(), inner);

        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), Some(&dialect), false);

        let open = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: Some("call_1".into()),
                        function: Some(OpenAiFunctionDelta { name: Some("Bash".into()), arguments: Some("".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        // Split the `"prompt":` key literal itself across two fragments.
        let frag1 = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(OpenAiFunctionDelta { name: None, arguments: Some("{\"prom".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let frag2 = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(OpenAiFunctionDelta { name: None, arguments: Some("pt\":\"ls\"}".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };

        let mut fragments = Vec::new();
        for chunk in [open, frag1, frag2] {
            for event in machine.on_chunk(chunk) {
                if let SseEvent::ContentBlockDelta(value) = event {
                    if let Some(partial) = value["delta"]["partial_json"].as_str() {
                        fragments.push(partial.to_string());
                    }
                }
            }
        }
        let events = machine.on_chunk(OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice { index: 0, delta: OpenAiDelta::default(), finish_reason: Some("tool_calls".into()) }],
            usage: None,
        });
        for event in events {
            if let SseEvent::ContentBlockDelta(value) = event {
                if let Some(partial) = value["delta"]["partial_json"].as_str() {
                    fragments.push(partial.to_string());
                }
            }
        }

        let joined = fragments.concat();
        assert_eq!(joined, "{\"command\":\"ls\"}");
    }

    #[test]
    fn tool_call_fragment_preceding_its_id_is_buffered_not_dropped() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);

        // Argument fragment arrives before any id.
        let no_id_yet = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(OpenAiFunctionDelta { name: Some("get_weather".into()), arguments: Some("{\"loc".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let events = machine.on_chunk(no_id_yet);
        // Only message_start — nothing opened yet since there's no id.
        assert_eq!(events.iter().map(event_kind).collect::<Vec<_>>(), vec!["message_start"]);

        // The id shows up on a later fragment.
        let id_arrives = OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: Some("call_1".into()),
                        function: Some(OpenAiFunctionDelta { name: None, arguments: Some("ation\":\"NYC\"}".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let events = machine.on_chunk(id_arrives);
        let kinds: Vec<_> = events.iter().map(event_kind).collect();
        assert_eq!(kinds, vec!["content_block_start", "content_block_delta"]);

        let SseEvent::ContentBlockDelta(value) = &events[1] else { panic!("expected content_block_delta") };
        assert_eq!(value["delta"]["partial_json"], "{\"location\":\"NYC\"}");
    }

    #[test]
    fn tool_call_fragment_never_getting_an_id_is_dropped_at_stream_end() {
        let mut machine = StreamMachine::new("msg_1".into(), "claude-3-5-sonnet".into(), None, false);
        machine.on_chunk(OpenAiChunk {
            id: None,
            model: None,
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(OpenAiFunctionDelta { name: Some("get_weather".into()), arguments: Some("{}".into()) }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        });

        let events = machine.on_done();
        // No tool_use block was ever opened: only the terminal sequence.
        let kinds: Vec<_> = events.iter().map(event_kind).collect();
        assert_eq!(kinds, vec!["message_delta", "message_stop"]);
    }

    fn event_kind(event: &SseEvent) -> &'static str {
        match event {
            SseEvent::MessageStart(_) => "message_start",
            SseEvent::ContentBlockStart(_) => "content_block_start",
            SseEvent::ContentBlockDelta(_) => "content_block_delta",
            SseEvent::ContentBlockStop(_) => "content_block_stop",
            SseEvent::MessageDelta(_) => "message_delta",
            SseEvent::MessageStop => "message_stop",
            SseEvent::Error(_) => "error",
        }
    }
}
