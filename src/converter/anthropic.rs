//!
//! Anthropic messages <-> backend schema converter.
//!
//! Converts Anthropic Messages API requests into generate-content requests and
//! backend responses back into messages, including the streamed event
//! taxonomy (`message_start`, `content_block_*`, `message_delta`,
//! `message_stop`, `ping`, `error`).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::LogLevel;
use crate::converter::gemini::{
    Blob, Content, FunctionCall, FunctionCallingConfig, FunctionDeclaration, FunctionResponse,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part, ThinkingConfig, Tool,
    ToolConfig,
};
use crate::converter::schema::{clean_schema, normalize_function_name};
use crate::converter::{ClientProtocol, StreamTranslator, signature};
use crate::error::{ProxyError, Result};
use crate::sse::SseFrame;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Anthropic messages request.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub system: Option<SystemPrompt>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    pub tools: Option<Vec<AnthropicTool>>,
    pub tool_choice: Option<AnthropicToolChoice>,
    /** extended thinking settings */
    pub thinking: Option<ThinkingParam>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// System prompt as a string or a list of text blocks
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<Value>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    /** user or assistant */
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

///
/// Request content block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /** function name, when the client sends it along */
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        content: Option<Value>,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
        signature: Option<String>,
    },
    RedactedThinking {
        #[serde(default)]
        data: String,
    },
    /** document, search results and other blocks the backend cannot take */
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

/// `{"type":"auto"|"any"|"none"}` or `{"type":"tool","name":..}`
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicToolChoice {
    #[serde(rename = "type")]
    pub choice_type: String,
    pub name: Option<String>,
}

/// `{"type":"enabled","budget_tokens":N}` or `{"type":"disabled"}`
#[derive(Debug, Clone, Deserialize)]
pub struct ThinkingParam {
    #[serde(rename = "type")]
    pub thinking_type: String,
    pub budget_tokens: Option<i64>,
}

///
/// Anthropic messages response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub model: String,
    pub content: Vec<ResponseBlock>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Image {
        source: ResponseImageSource,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

///
/// Anthropic <-> backend converter.
#[derive(Debug, Clone, Copy)]
pub struct AnthropicConverter {
    /** logging level for debug output */
    log_level: LogLevel,
}

/// Content block currently open in a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
}

///
/// Stream state for one Anthropic messages stream.
#[derive(Debug)]
pub struct AnthropicStreamTranslator {
    id: String,
    model: String,
    started: bool,
    open_block: Option<BlockKind>,
    /** index of the next content block */
    next_index: u32,
    saw_tool_use: bool,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
    finished: bool,
}

/* --- constants ------------------------------------------------------------------------------- */

const DEFAULT_TEMPERATURE: f64 = 0.4;

const DEFAULT_THINKING_BUDGET: i64 = 1024;

const EMPTY_CONVERSATION_TEXT: &str = "Hello";

/* --- start of code -------------------------------------------------------------------------- */

impl AnthropicConverter {
    ///
    /// Create a new Anthropic converter.
    ///
    /// # Arguments
    ///  * `log_level` - logging level for debug output
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }

    ///
    /// Convert an Anthropic request into a backend request.
    ///
    /// # Arguments
    ///  * `request` - Anthropic messages request
    ///
    /// # Returns
    ///  * Backend request
    ///  * `ProxyError::Translation` if a tool result answers an unknown tool use
    pub fn to_backend(&self, request: &MessagesRequest) -> Result<GenerateContentRequest> {
        self.debug(&format!(
            "Converting {} message(s) from Anthropic to backend format",
            request.messages.len()
        ));

        let tool_names = tool_use_names(&request.messages);
        let mut contents = Vec::new();
        for msg in &request.messages {
            let role = if msg.role == "assistant" { "model" } else { "user" };
            let parts = match &msg.content {
                AnthropicContent::Text(text) if text.trim().is_empty() => Vec::new(),
                AnthropicContent::Text(text) => vec![Part::text(text.clone())],
                AnthropicContent::Blocks(blocks) => self.convert_blocks(blocks, &tool_names)?,
            };
            if !parts.is_empty() {
                contents.push(Content::new(role, parts));
            }
        }

        let mut contents = reorganize_tool_messages(contents);
        if contents.is_empty() {
            contents.push(Content::new("user", vec![Part::text(EMPTY_CONVERSATION_TEXT)]));
        }

        let backend = GenerateContentRequest {
            contents,
            system_instruction: system_instruction(request.system.as_ref()),
            generation_config: Some(self.generation_config(request)),
            tools: convert_tools(request.tools.as_deref()),
            tool_config: request.tool_choice.as_ref().and_then(convert_tool_choice),
            safety_settings: None,
            extra: Map::new(),
        };

        self.debug(&format!("Converted backend request with {} turn(s)", backend.contents.len()));
        Ok(backend)
    }

    ///
    /// Convert a complete backend response into an Anthropic message.
    ///
    /// # Arguments
    ///  * `response` - backend response, unwrapped
    ///  * `model` - model name echoed to the client
    pub fn from_backend(&self, response: &GenerateContentResponse, model: &str) -> MessagesResponse {
        let mut content = Vec::new();
        for part in response.parts() {
            if let Some(call) = &part.function_call {
                content.push(ResponseBlock::ToolUse {
                    id: tool_use_id(call, part.thought_signature.as_deref()),
                    name: call.name.clone(),
                    input: remove_nulls(&call.args),
                });
            } else if let Some(blob) = &part.inline_data {
                content.push(ResponseBlock::Image {
                    source: ResponseImageSource {
                        source_type: "base64".to_string(),
                        media_type: blob.mime_type.clone(),
                        data: blob.data.clone(),
                    },
                });
            } else if part.is_thought() {
                content.push(ResponseBlock::Thinking {
                    thinking: part.text.clone().unwrap_or_default(),
                    signature: part.thought_signature.clone(),
                });
            } else if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                content.push(ResponseBlock::Text { text: text.to_string() });
            }
        }

        let has_tool_use = content.iter().any(|b| matches!(b, ResponseBlock::ToolUse { .. }));
        let stop_reason = stop_reason(response.finish_reason(), has_tool_use);
        self.debug(&format!("Backend response mapped to stop_reason={}", stop_reason));

        MessagesResponse {
            id: message_id(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            model: model.to_string(),
            content,
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage: response
                .usage_metadata
                .map(|u| AnthropicUsage {
                    input_tokens: u.prompt_token_count,
                    output_tokens: u.candidates_token_count,
                })
                .unwrap_or_default(),
        }
    }

    /// Fresh stream translator for one response
    pub fn stream_translator(&self, model: &str) -> AnthropicStreamTranslator {
        AnthropicStreamTranslator::new(model)
    }

    fn convert_blocks(
        &self,
        blocks: &[ContentBlock],
        tool_names: &HashMap<String, String>,
    ) -> Result<Vec<Part>> {
        let mut parts = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text { text } => {
                    if !text.trim().is_empty() {
                        parts.push(Part::text(text.clone()));
                    }
                }
                ContentBlock::Image { source } => match (&source.media_type, &source.data) {
                    (Some(mime_type), Some(data)) if source.source_type == "base64" => {
                        parts.push(Part {
                            inline_data: Some(Blob { mime_type: mime_type.clone(), data: data.clone() }),
                            ..Part::default()
                        });
                    }
                    _ => self.debug(&format!("Dropping image with source type '{}'", source.source_type)),
                },
                ContentBlock::ToolUse { id, name, input } => {
                    let (id, thought_signature) = signature::decode(id);
                    let name = normalize_function_name(name);
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            id: Some(id),
                            name,
                            args: if input.is_null() { json!({}) } else { input.clone() },
                        }),
                        thought_signature,
                        ..Part::default()
                    });
                }
                ContentBlock::ToolResult { tool_use_id, name, content } => {
                    let (id, _) = signature::decode(tool_use_id);
                    let name = name
                        .as_deref()
                        .filter(|n| !n.is_empty())
                        .map(normalize_function_name)
                        .or_else(|| tool_names.get(&id).cloned())
                        .ok_or_else(|| {
                            ProxyError::Translation(format!(
                                "tool_result '{}' has no name and answers no tool_use block",
                                tool_use_id
                            ))
                        })?;
                    parts.push(Part {
                        function_response: Some(FunctionResponse {
                            id: Some(id),
                            name,
                            response: json!({ "output": tool_result_text(content.as_ref()) }),
                        }),
                        ..Part::default()
                    });
                }
                ContentBlock::Thinking { thinking, signature: Some(sig) } if !sig.is_empty() => {
                    parts.push(Part {
                        text: Some(thinking.clone()),
                        thought: Some(true),
                        thought_signature: Some(sig.clone()),
                        ..Part::default()
                    });
                }
                // unsigned reasoning cannot be replayed to the backend
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {
                    self.debug("Dropping unsigned thinking block");
                }
                ContentBlock::Unsupported => self.debug("Dropping unsupported content block"),
            }
        }
        Ok(parts)
    }

    fn generation_config(&self, request: &MessagesRequest) -> GenerationConfig {
        GenerationConfig {
            temperature: Some(request.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
            top_p: request.top_p,
            top_k: request.top_k,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop_sequences.clone().filter(|s| !s.is_empty()),
            thinking_config: request
                .thinking
                .as_ref()
                .map(|thinking| thinking_config(thinking, request.max_tokens)),
            ..GenerationConfig::default()
        }
    }

    ///
    /// Log debug message if trace logging is enabled.
    ///
    /// # Arguments
    ///  * `msg` - debug message to log
    pub(crate) fn debug(&self, msg: &str) {
        if self.log_level.is_trace_enabled() {
            tracing::debug!("[TRACE] {}", msg);
        }
    }
}

impl AnthropicStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            id: message_id(),
            model: model.to_string(),
            started: false,
            open_block: None,
            next_index: 0,
            saw_tool_use: false,
            stop_reason: None,
            usage: AnthropicUsage::default(),
            finished: false,
        }
    }

    fn event(name: &str, payload: Value) -> SseFrame {
        SseFrame::json(Some(name), &payload)
    }

    fn ensure_started(&mut self, frames: &mut Vec<SseFrame>) {
        if self.started {
            return;
        }
        self.started = true;
        frames.push(Self::event(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": self.usage.input_tokens, "output_tokens": 0}
                }
            }),
        ));
    }

    fn open(&mut self, kind: BlockKind, frames: &mut Vec<SseFrame>) {
        if self.open_block == Some(kind) {
            return;
        }
        self.close(frames);
        let block = match kind {
            BlockKind::Text => json!({"type": "text", "text": ""}),
            BlockKind::Thinking => json!({"type": "thinking", "thinking": ""}),
        };
        frames.push(Self::event(
            "content_block_start",
            json!({"type": "content_block_start", "index": self.next_index, "content_block": block}),
        ));
        self.open_block = Some(kind);
    }

    fn close(&mut self, frames: &mut Vec<SseFrame>) {
        if self.open_block.take().is_some() {
            frames.push(Self::event(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": self.next_index}),
            ));
            self.next_index += 1;
        }
    }

    fn delta(&self, delta: Value) -> SseFrame {
        Self::event(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": self.next_index, "delta": delta}),
        )
    }

    /// A block that is complete on arrival: start, optional delta, stop
    fn whole_block(&mut self, block: Value, delta: Option<Value>, frames: &mut Vec<SseFrame>) {
        self.close(frames);
        frames.push(Self::event(
            "content_block_start",
            json!({"type": "content_block_start", "index": self.next_index, "content_block": block}),
        ));
        if let Some(delta) = delta {
            frames.push(self.delta(delta));
        }
        frames.push(Self::event(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": self.next_index}),
        ));
        self.next_index += 1;
    }
}

impl StreamTranslator for AnthropicStreamTranslator {
    fn on_chunk(&mut self, chunk: &GenerateContentResponse) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        if let Some(usage) = chunk.usage_metadata {
            self.usage = AnthropicUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
            };
        }

        let mut frames = Vec::new();
        self.ensure_started(&mut frames);

        for part in chunk.parts() {
            if let Some(call) = &part.function_call {
                self.saw_tool_use = true;
                let block = json!({
                    "type": "tool_use",
                    "id": tool_use_id(call, part.thought_signature.as_deref()),
                    "name": call.name,
                    "input": {}
                });
                let args = serde_json::to_string(&remove_nulls(&call.args)).unwrap_or_else(|_| "{}".to_string());
                let delta = json!({"type": "input_json_delta", "partial_json": args});
                self.whole_block(block, Some(delta), &mut frames);
            } else if let Some(blob) = &part.inline_data {
                let block = json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": blob.mime_type, "data": blob.data}
                });
                self.whole_block(block, None, &mut frames);
            } else if part.is_thought() {
                self.open(BlockKind::Thinking, &mut frames);
                if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                    frames.push(self.delta(json!({"type": "thinking_delta", "thinking": text})));
                }
                if let Some(sig) = part.thought_signature.as_deref() {
                    frames.push(self.delta(json!({"type": "signature_delta", "signature": sig})));
                }
            } else if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                self.open(BlockKind::Text, &mut frames);
                frames.push(self.delta(json!({"type": "text_delta", "text": text})));
            }
        }

        if let Some(reason) = chunk.finish_reason() {
            self.stop_reason = Some(stop_reason(Some(reason), self.saw_tool_use));
        }
        frames
    }

    fn on_error(&mut self, status: u16, body: &str) -> Vec<SseFrame> {
        if std::mem::replace(&mut self.finished, true) {
            return Vec::new();
        }
        vec![Self::event("error", ClientProtocol::Anthropic.backend_error_body(status, body))]
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        if std::mem::replace(&mut self.finished, true) {
            return Vec::new();
        }
        let mut frames = Vec::new();
        self.ensure_started(&mut frames);
        self.close(&mut frames);

        let stop_reason = if self.saw_tool_use {
            "tool_use".to_string()
        } else {
            self.stop_reason.clone().unwrap_or_else(|| "end_turn".to_string())
        };
        frames.push(Self::event(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"output_tokens": self.usage.output_tokens}
            }),
        ));
        frames.push(Self::event("message_stop", json!({"type": "message_stop"})));
        frames
    }

    fn heartbeat(&self) -> SseFrame {
        Self::event("ping", json!({"type": "ping"}))
    }
}

///
/// Map a backend finish reason to Anthropic's stop reason.
pub fn stop_reason(reason: Option<&str>, has_tool_use: bool) -> String {
    let mapped = if has_tool_use {
        "tool_use"
    } else if reason == Some("MAX_TOKENS") {
        "max_tokens"
    } else {
        "end_turn"
    };
    mapped.to_string()
}

///
/// Order tool turns so every function call is directly followed by its result.
///
/// Calls whose result appears anywhere in the conversation are split into their
/// own model turn followed by a user turn holding the result; results are
/// removed from their original position.
///
/// # Arguments
///  * `contents` - converted turns in client order
///
/// # Returns
///  * Reordered turns
pub fn reorganize_tool_messages(contents: Vec<Content>) -> Vec<Content> {
    let call_ids: HashSet<String> = contents
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.function_call.as_ref()?.id.clone())
        .collect();

    let mut responses: HashMap<String, Part> = HashMap::new();
    for part in contents.iter().flat_map(|c| c.parts.iter()) {
        if let Some(id) = part.function_response.as_ref().and_then(|r| r.id.clone()) {
            if call_ids.contains(&id) {
                responses.entry(id).or_insert_with(|| part.clone());
            }
        }
    }
    if responses.is_empty() {
        return contents;
    }

    let mut reorganized = Vec::with_capacity(contents.len());
    for content in contents {
        let role = content.role.clone().unwrap_or_else(|| "user".to_string());
        let mut pending = Vec::new();
        for part in content.parts {
            let answers_call = part
                .function_response
                .as_ref()
                .and_then(|r| r.id.as_ref())
                .is_some_and(|id| call_ids.contains(id));
            if answers_call {
                continue;
            }

            let response = part
                .function_call
                .as_ref()
                .and_then(|c| c.id.as_ref())
                .and_then(|id| responses.remove(id));
            pending.push(part);
            if let Some(response) = response {
                reorganized.push(Content::new(&role, std::mem::take(&mut pending)));
                reorganized.push(Content::new("user", vec![response]));
            }
        }
        if !pending.is_empty() {
            reorganized.push(Content::new(&role, pending));
        }
    }
    reorganized
}

/// Map every `tool_use` id in the conversation to its normalized function name
fn tool_use_names(messages: &[AnthropicMessage]) -> HashMap<String, String> {
    messages
        .iter()
        .filter_map(|msg| match &msg.content {
            AnthropicContent::Blocks(blocks) => Some(blocks),
            AnthropicContent::Text(_) => None,
        })
        .flatten()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, .. } => {
                Some((signature::decode(id).0, normalize_function_name(name)))
            }
            _ => None,
        })
        .collect()
}

fn system_instruction(system: Option<&SystemPrompt>) -> Option<Content> {
    let text = match system? {
        SystemPrompt::Text(text) => text.clone(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
    };
    (!text.trim().is_empty()).then(|| Content { role: None, parts: vec![Part::text(text)] })
}

///
/// Thinking settings for the backend.
///
/// The budget defaults to 1024 and is kept below `max_tokens`.
fn thinking_config(thinking: &ThinkingParam, max_tokens: Option<u32>) -> ThinkingConfig {
    if thinking.thinking_type != "enabled" {
        return ThinkingConfig { include_thoughts: Some(false), ..ThinkingConfig::default() };
    }
    let mut budget = thinking.budget_tokens.unwrap_or(DEFAULT_THINKING_BUDGET);
    if let Some(max) = max_tokens.map(i64::from) {
        if budget >= max {
            budget = (max - 1).max(0);
        }
    }
    ThinkingConfig {
        include_thoughts: Some(true),
        thinking_budget: Some(budget),
        extra: Map::new(),
    }
}

fn convert_tools(tools: Option<&[AnthropicTool]>) -> Option<Vec<Tool>> {
    let tools = tools.filter(|t| !t.is_empty())?;
    let declarations = tools
        .iter()
        .map(|tool| FunctionDeclaration {
            name: normalize_function_name(&tool.name),
            description: tool.description.clone(),
            parameters: tool.input_schema.as_ref().map(clean_schema),
        })
        .collect();
    Some(vec![Tool { function_declarations: declarations, extra: Map::new() }])
}

fn convert_tool_choice(choice: &AnthropicToolChoice) -> Option<ToolConfig> {
    let (mode, allowed) = match choice.choice_type.as_str() {
        "auto" => ("AUTO", None),
        "any" => ("ANY", None),
        "none" => ("NONE", None),
        "tool" => ("ANY", Some(vec![normalize_function_name(choice.name.as_deref()?)])),
        _ => return None,
    };
    Some(ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_string(),
            allowed_function_names: allowed,
        },
        extra: Map::new(),
    })
}

/// Text of a tool_result: the string itself or the first text block
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .find_map(|b| b.get("text").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    }
}

fn tool_use_id(call: &FunctionCall, thought_signature: Option<&str>) -> String {
    let id = call
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));
    signature::encode(&id, thought_signature)
}

/// Drop `null` members from objects, recursively
fn remove_nulls(value: &Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), remove_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(remove_nulls).collect()),
        Value::Null => json!({}),
        other => other.clone(),
    }
}

fn message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/* --- tests ----------------------------------------------------------------------------------- */
