//!
//! OpenAI chat-completions <-> backend schema converter.
//!
//! Converts OpenAI-compatible chat completion requests into generate-content
//! requests, and backend responses (unary and streamed) back into chat
//! completions. Tool-call ids carry the backend's continuation signature via
//! [`crate::converter::signature`].
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::LogLevel;
use crate::converter::gemini::{
    Blob, Content, FunctionCall, FunctionCallingConfig, FunctionDeclaration, FunctionResponse,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part, Tool, ToolConfig,
    UsageMetadata,
};
use crate::converter::schema::{clean_schema, normalize_function_name};
use crate::converter::{ClientProtocol, StreamTranslator, signature, unix_timestamp};
use crate::error::{ProxyError, Result};
use crate::sse::SseFrame;

/* --- types ----------------------------------------------------------------------------------- */

///
/// OpenAI chat completion request structure.
///
/// Represents an incoming request in OpenAI's chat completions API format.
/// Contains messages, model configuration, and optional tool definitions.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /** the model identifier, possibly with a feature prefix */
    pub model: String,
    /** conversation messages array */
    pub messages: Vec<ChatMessage>,
    /** whether to stream the response */
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    /** newer alias of `max_tokens`, preferred when both are set */
    pub max_completion_tokens: Option<u32>,
    pub stop: Option<StopSequences>,
    pub n: Option<u32>,
    pub seed: Option<i64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub response_format: Option<Value>,
    /** available tools for function calling */
    pub tools: Option<Vec<ChatTool>>,
    /** tool choice configuration */
    pub tool_choice: Option<ToolChoice>,
    /** fields with no backend counterpart */
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `stop` accepts a single string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

///
/// OpenAI message structure within a chat completion request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    /** system, developer, user, assistant or tool */
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    /** function name on tool messages */
    pub name: Option<String>,
    /** tool calls made by the assistant */
    pub tool_calls: Option<Vec<ToolCall>>,
    /** tool call id for tool response messages */
    pub tool_call_id: Option<String>,
}

/// Plain string content or structured content parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    /** text or image_url */
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: Option<String>,
    pub image_url: Option<ImageUrl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    /** client-visible id, possibly carrying a signature */
    pub id: String,
    pub function: FunctionCallSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCallSpec {
    pub name: String,
    /** JSON-encoded string, or an object from lenient clients */
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatTool {
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
}

/// `"auto"`, `"none"`, `"required"` or `{"type":"function","function":{"name":..}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Function(ToolChoiceObject),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolChoiceObject {
    pub function: Option<ToolChoiceFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

///
/// OpenAI chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseToolCall {
    /** position within the message; streamed deltas only */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ResponseFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFunction {
    pub name: String,
    /** JSON-encoded arguments */
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

///
/// One streamed chat completion chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

///
/// OpenAI <-> backend converter.
///
/// Stateless apart from the log level used for trace output.
#[derive(Debug, Clone, Copy)]
pub struct OpenAiConverter {
    /** logging level for debug output */
    log_level: LogLevel,
}

///
/// Stream state for one OpenAI chat completion stream.
#[derive(Debug)]
pub struct OpenAiStreamTranslator {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    /** index assigned to the next streamed tool call */
    next_tool_index: u32,
    saw_tool_call: bool,
    finish_sent: bool,
    finished: bool,
    usage: Option<Usage>,
    /** usage arrived but has not been sent to the client yet */
    usage_pending: bool,
}

/* --- constants ------------------------------------------------------------------------------- */

const OBJECT_COMPLETION: &str = "chat.completion";

const OBJECT_CHUNK: &str = "chat.completion.chunk";

/** Text sent when a conversation has no turns left after system extraction */
const EMPTY_CONVERSATION_TEXT: &str = "Hello";

/* --- start of code -------------------------------------------------------------------------- */

impl OpenAiConverter {
    ///
    /// Create a new OpenAI converter.
    ///
    /// # Arguments
    ///  * `log_level` - logging level for debug output
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }

    ///
    /// Convert an OpenAI request into a backend request.
    ///
    /// Leading system messages become the system instruction, later ones are
    /// sent as user turns. Tool messages are resolved to the function name of
    /// the assistant call they answer.
    ///
    /// # Arguments
    ///  * `request` - OpenAI format request to convert
    ///
    /// # Returns
    ///  * Backend request
    ///  * `ProxyError::Translation` if a tool message cannot be attributed to a function
    pub fn to_backend(&self, request: &ChatCompletionRequest) -> Result<GenerateContentRequest> {
        self.debug(&format!(
            "Converting {} message(s) from OpenAI to backend format",
            request.messages.len()
        ));

        let mut system_texts: Vec<String> = Vec::new();
        let mut contents: Vec<Content> = Vec::new();
        let mut call_names: HashMap<String, String> = HashMap::new();

        for msg in &request.messages {
            match msg.role.as_str() {
                "system" | "developer" => {
                    let text = message_text(msg.content.as_ref());
                    if text.is_empty() {
                        continue;
                    }
                    if contents.is_empty() {
                        system_texts.push(text);
                    } else {
                        contents.push(Content::new("user", vec![Part::text(text)]));
                    }
                }
                "assistant" => {
                    let parts = self.assistant_parts(msg, &mut call_names);
                    if !parts.is_empty() {
                        contents.push(Content::new("model", parts));
                    }
                }
                "tool" | "function" => {
                    let part = self.tool_response_part(msg, &call_names)?;
                    push_function_response(&mut contents, part);
                }
                _ => {
                    let parts = self.user_parts(msg.content.as_ref());
                    if !parts.is_empty() {
                        contents.push(Content::new("user", parts));
                    }
                }
            }
        }

        if contents.is_empty() {
            contents.push(Content::new("user", vec![Part::text(EMPTY_CONVERSATION_TEXT)]));
        }

        let system_instruction = (!system_texts.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system_texts.join("\n\n"))],
        });

        let backend = GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: self.generation_config(request),
            tools: self.convert_tools(request.tools.as_deref()),
            tool_config: request.tool_choice.as_ref().and_then(convert_tool_choice),
            safety_settings: None,
            extra: Map::new(),
        };

        self.debug(&format!("Converted backend request with {} turn(s)", backend.contents.len()));
        Ok(backend)
    }

    ///
    /// Convert a complete backend response into a chat completion.
    ///
    /// # Arguments
    ///  * `response` - backend response, unwrapped
    ///  * `model` - model name echoed to the client
    ///
    /// # Returns
    ///  * OpenAI chat completion
    pub fn from_backend(&self, response: &GenerateContentResponse, model: &str) -> ChatCompletion {
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = Vec::new();

        for part in response.parts() {
            if let Some(call) = &part.function_call {
                tool_calls.push(response_tool_call(call, part.thought_signature.as_deref(), None));
            } else if let Some(blob) = &part.inline_data {
                content.push_str(&image_markdown(blob));
            } else if let Some(text) = &part.text {
                if part.is_thought() {
                    reasoning.push_str(text);
                } else {
                    content.push_str(text);
                }
            }
        }

        let finish_reason = finish_reason(response.finish_reason(), !tool_calls.is_empty())
            .unwrap_or_else(|| "stop".to_string());
        self.debug(&format!("Backend response mapped to finish_reason={}", finish_reason));

        ChatCompletion {
            id: completion_id(),
            object: OBJECT_COMPLETION.to_string(),
            created: unix_timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: (!content.is_empty() || tool_calls.is_empty()).then_some(content),
                    reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason: Some(finish_reason),
            }],
            usage: response.usage_metadata.map(usage_from),
        }
    }

    /// Fresh stream translator for one response
    pub fn stream_translator(&self, model: &str) -> OpenAiStreamTranslator {
        OpenAiStreamTranslator::new(model)
    }

    fn assistant_parts(
        &self,
        msg: &ChatMessage,
        call_names: &mut HashMap<String, String>,
    ) -> Vec<Part> {
        let mut parts = Vec::new();
        let text = message_text(msg.content.as_ref());
        if !text.trim().is_empty() {
            parts.push(Part::text(text));
        }

        for call in msg.tool_calls.iter().flatten() {
            let (id, thought_signature) = signature::decode(&call.id);
            let name = normalize_function_name(&call.function.name);
            call_names.insert(id.clone(), name.clone());
            parts.push(Part {
                function_call: Some(FunctionCall {
                    id: Some(id),
                    name,
                    args: self.parse_tool_arguments(&call.function.arguments),
                }),
                thought_signature,
                ..Part::default()
            });
        }
        parts
    }

    fn tool_response_part(
        &self,
        msg: &ChatMessage,
        call_names: &HashMap<String, String>,
    ) -> Result<Part> {
        let raw_id = msg.tool_call_id.as_deref().unwrap_or_default();
        let (id, _) = signature::decode(raw_id);
        let name = msg
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(normalize_function_name)
            .or_else(|| call_names.get(&id).cloned())
            .ok_or_else(|| {
                ProxyError::Translation(format!(
                    "tool message for call '{}' has no 'name' and answers no earlier assistant tool call",
                    raw_id
                ))
            })?;

        let text = message_text(msg.content.as_ref());
        let response = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(fields)) => Value::Object(fields),
            Ok(other) => json!({ "result": other }),
            Err(_) => json!({ "result": text }),
        };

        Ok(Part {
            function_response: Some(FunctionResponse {
                id: (!id.is_empty()).then_some(id),
                name,
                response,
            }),
            ..Part::default()
        })
    }

    fn user_parts(&self, content: Option<&MessageContent>) -> Vec<Part> {
        match content {
            None => Vec::new(),
            Some(MessageContent::Text(text)) => vec![Part::text(text.clone())],
            Some(MessageContent::Parts(blocks)) => blocks
                .iter()
                .filter_map(|block| match block.part_type.as_str() {
                    "text" => block.text.clone().filter(|t| !t.is_empty()).map(Part::text),
                    "image_url" => {
                        let url = &block.image_url.as_ref()?.url;
                        let blob = parse_data_uri(url);
                        if blob.is_none() {
                            self.debug(&format!("Dropping non-inline image URL ({} chars)", url.len()));
                        }
                        blob.map(|blob| Part { inline_data: Some(blob), ..Part::default() })
                    }
                    other => {
                        self.debug(&format!("Ignoring unsupported content part '{}'", other));
                        None
                    }
                })
                .collect(),
        }
    }

    fn generation_config(&self, request: &ChatCompletionRequest) -> Option<GenerationConfig> {
        let stop_sequences = request.stop.as_ref().map(|stop| match stop {
            StopSequences::One(s) => vec![s.clone()],
            StopSequences::Many(list) => list.clone(),
        });
        let response_mime_type = request
            .response_format
            .as_ref()
            .and_then(|f| f.get("type")?.as_str())
            .filter(|kind| matches!(*kind, "json_object" | "json_schema"))
            .map(|_| "application/json".to_string());

        let config = GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
            stop_sequences,
            candidate_count: request.n,
            seed: request.seed,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            response_mime_type,
            ..GenerationConfig::default()
        };
        (config != GenerationConfig::default()).then_some(config)
    }

    fn convert_tools(&self, tools: Option<&[ChatTool]>) -> Option<Vec<Tool>> {
        let tools = tools.filter(|t| !t.is_empty())?;
        let declarations = tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: normalize_function_name(&tool.function.name),
                description: tool.function.description.clone(),
                parameters: tool.function.parameters.as_ref().map(clean_schema),
            })
            .collect();
        Some(vec![Tool { function_declarations: declarations, extra: Map::new() }])
    }

    ///
    /// Parse tool arguments into an object.
    ///
    /// # Arguments
    ///  * `arguments` - JSON string or object from the client
    ///
    /// # Returns
    ///  * Parsed object, `{}` when arguments are absent or malformed
    fn parse_tool_arguments(&self, arguments: &Value) -> Value {
        match arguments {
            Value::String(s) if s.trim().is_empty() => json!({}),
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|e| {
                tracing::warn!("Malformed tool arguments, sending empty object: {}", e);
                json!({})
            }),
            Value::Null => json!({}),
            other => other.clone(),
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

impl OpenAiStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            id: completion_id(),
            model: model.to_string(),
            created: unix_timestamp(),
            role_sent: false,
            next_tool_index: 0,
            saw_tool_call: false,
            finish_sent: false,
            finished: false,
            usage: None,
            usage_pending: false,
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<String>, usage: Option<Usage>) -> SseFrame {
        SseFrame::json(
            None,
            &ChatCompletionChunk {
                id: self.id.clone(),
                object: OBJECT_CHUNK.to_string(),
                created: self.created,
                model: self.model.clone(),
                choices: vec![ChunkChoice { index: 0, delta, finish_reason }],
                usage,
            },
        )
    }

    /// Trailing chunk carrying only usage, as OpenAI sends with `include_usage`
    fn usage_chunk(&self, usage: Usage) -> SseFrame {
        SseFrame::json(
            None,
            &ChatCompletionChunk {
                id: self.id.clone(),
                object: OBJECT_CHUNK.to_string(),
                created: self.created,
                model: self.model.clone(),
                choices: Vec::new(),
                usage: Some(usage),
            },
        )
    }
}

impl StreamTranslator for OpenAiStreamTranslator {
    fn on_chunk(&mut self, chunk: &GenerateContentResponse) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }

        let mut delta = Delta::default();
        let mut tool_calls = Vec::new();
        for part in chunk.parts() {
            if let Some(call) = &part.function_call {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                tool_calls.push(response_tool_call(call, part.thought_signature.as_deref(), Some(index)));
            } else if let Some(blob) = &part.inline_data {
                delta.content.get_or_insert_with(String::new).push_str(&image_markdown(blob));
            } else if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                let target = if part.is_thought() { &mut delta.reasoning_content } else { &mut delta.content };
                target.get_or_insert_with(String::new).push_str(text);
            }
        }
        if !tool_calls.is_empty() {
            self.saw_tool_call = true;
            delta.tool_calls = Some(tool_calls);
        }
        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage_from(usage));
            self.usage_pending = true;
        }

        let finish = if self.finish_sent {
            None
        } else {
            finish_reason(chunk.finish_reason(), self.saw_tool_call)
        };
        let has_delta =
            delta.content.is_some() || delta.reasoning_content.is_some() || delta.tool_calls.is_some();
        if !has_delta && finish.is_none() {
            return Vec::new();
        }

        if !self.role_sent {
            delta.role = Some("assistant".to_string());
            self.role_sent = true;
        }
        let usage = if finish.is_some() {
            self.usage_pending = false;
            self.usage
        } else {
            None
        };
        self.finish_sent |= finish.is_some();
        vec![self.chunk(delta, finish, usage)]
    }

    fn on_error(&mut self, status: u16, body: &str) -> Vec<SseFrame> {
        if std::mem::replace(&mut self.finished, true) {
            return Vec::new();
        }
        vec![
            SseFrame::json(None, &ClientProtocol::OpenAi.backend_error_body(status, body)),
            SseFrame::done(),
        ]
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        if std::mem::replace(&mut self.finished, true) {
            return Vec::new();
        }
        let mut frames = Vec::new();
        if !self.finish_sent {
            let reason = if self.saw_tool_call { "tool_calls" } else { "stop" };
            let delta = Delta {
                role: (!self.role_sent).then(|| "assistant".to_string()),
                ..Delta::default()
            };
            frames.push(self.chunk(delta, Some(reason.to_string()), self.usage));
            self.finish_sent = true;
        } else if let Some(usage) = self.usage.filter(|_| self.usage_pending) {
            frames.push(self.usage_chunk(usage));
        }
        self.usage_pending = false;
        frames.push(SseFrame::done());
        frames
    }

    fn heartbeat(&self) -> SseFrame {
        let delta = Delta {
            role: Some("assistant".to_string()),
            content: Some(String::new()),
            ..Delta::default()
        };
        self.chunk(delta, None, None)
    }
}

///
/// Map a backend finish reason to OpenAI's vocabulary.
///
/// # Arguments
///  * `reason` - backend finish reason, if the chunk carries one
///  * `has_tool_calls` - whether the response contains a function call
///
/// # Returns
///  * `None` while the backend has not finished
pub fn finish_reason(reason: Option<&str>, has_tool_calls: bool) -> Option<String> {
    let mapped = match reason? {
        _ if has_tool_calls => "tool_calls",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "content_filter",
        _ => "stop",
    };
    Some(mapped.to_string())
}

fn response_tool_call(call: &FunctionCall, thought_signature: Option<&str>, index: Option<u32>) -> ResponseToolCall {
    let id = call.id.clone().filter(|id| !id.is_empty()).unwrap_or_else(new_call_id);
    ResponseToolCall {
        index,
        id: signature::encode(&id, thought_signature),
        call_type: "function".to_string(),
        function: ResponseFunction {
            name: call.name.clone(),
            arguments: serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string()),
        },
    }
}

/// Attach a tool result to the previous turn when it only holds tool results
fn push_function_response(contents: &mut Vec<Content>, part: Part) {
    if let Some(last) = contents.last_mut() {
        let only_responses = last.role.as_deref() == Some("user")
            && !last.parts.is_empty()
            && last.parts.iter().all(|p| p.function_response.is_some());
        if only_responses {
            last.parts.push(part);
            return;
        }
    }
    contents.push(Content::new("user", vec![part]));
}

fn convert_tool_choice(choice: &ToolChoice) -> Option<ToolConfig> {
    let (mode, allowed) = match choice {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => ("AUTO", None),
            "none" => ("NONE", None),
            "required" | "any" => ("ANY", None),
            _ => return None,
        },
        ToolChoice::Function(obj) => {
            let name = normalize_function_name(&obj.function.as_ref()?.name);
            ("ANY", Some(vec![name]))
        }
    };
    Some(ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_string(),
            allowed_function_names: allowed,
        },
        extra: Map::new(),
    })
}

/// Concatenated text of a message's content
fn message_text(content: Option<&MessageContent>) -> String {
    match content {
        None => String::new(),
        Some(MessageContent::Text(text)) => text.clone(),
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .filter(|p| p.part_type == "text")
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join(""),
    }
}

/// `data:<mime>;base64,<payload>` to an inline blob
fn parse_data_uri(url: &str) -> Option<Blob> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    Some(Blob { mime_type: mime_type.to_string(), data: data.to_string() })
}

fn image_markdown(blob: &Blob) -> String {
    format!("![image](data:{};base64,{})", blob.mime_type, blob.data)
}

fn usage_from(usage: UsageMetadata) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    }
}

fn completion_id() -> String {
    format!("chatcmpl-{}", chrono::Utc::now().timestamp_millis())
}

fn new_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..24])
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::gemini::parse_chunk;

    fn converter() -> OpenAiConverter {
        OpenAiConverter::new(LogLevel::Info)
    }

    fn request(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_plain_text_response() {
        let response = parse_chunk(
            r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":2,"totalTokenCount":7}}"#,
        )
        .unwrap();

        let completion = converter().from_backend(&response, "gemini-2.5-pro");
        assert_eq!(completion.object, "chat.completion");
        assert!(completion.id.starts_with("chatcmpl-"));
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.choices[0].message.content.as_deref(), Some("hi"));
        let usage = completion.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 7);
    }

    #[test]
    fn test_function_call_response_maps_to_tool_calls() {
        let response = parse_chunk(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"pondering","thought":true},
                {"functionCall":{"id":"call_1","name":"get_weather","args":{"city":"Oslo"}},"thoughtSignature":"SIG"}
            ]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();

        let completion = converter().from_backend(&response, "m");
        let choice = &completion.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(choice.message.content, None);
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("pondering"));

        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "call_1__thought__SIG");
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(serde_json::from_str::<Value>(&call.function.arguments).unwrap(), json!({"city": "Oslo"}));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(finish_reason(Some("MAX_TOKENS"), false).as_deref(), Some("length"));
        assert_eq!(finish_reason(Some("SAFETY"), false).as_deref(), Some("content_filter"));
        assert_eq!(finish_reason(Some("STOP"), true).as_deref(), Some("tool_calls"));
        assert_eq!(finish_reason(None, true), None);
    }

    #[test]
    fn test_request_mapping() {
        let req = request(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "system", "content": [{"type": "text", "text": "Use metric units."}]},
                {"role": "user", "content": "Weather in Oslo?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1__thought__SIG", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1__thought__SIG", "content": "{\"temp\":3}"},
                {"role": "system", "content": "Late instruction"}
            ],
            "temperature": 0.3,
            "max_tokens": 256,
            "stop": "END",
            "response_format": {"type": "json_object"},
            "tools": [{"type": "function", "function": {
                "name": "get_weather", "description": "Weather lookup",
                "parameters": {"$schema": "x", "properties": {"city": {"type": "string"}}}
            }}],
            "tool_choice": {"type": "function", "function": {"name": "get_weather"}}
        }));

        let backend = converter().to_backend(&req).unwrap();

        let system = backend.system_instruction.unwrap();
        assert_eq!(system.parts[0].text.as_deref(), Some("Be brief.\n\nUse metric units."));

        assert_eq!(backend.contents.len(), 4);
        assert_eq!(backend.contents[1].role.as_deref(), Some("model"));
        let call_part = &backend.contents[1].parts[0];
        let call = call_part.function_call.as_ref().unwrap();
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.args, json!({"city": "Oslo"}));
        assert_eq!(call_part.thought_signature.as_deref(), Some("SIG"));

        let result = backend.contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(result.id.as_deref(), Some("call_1"));
        assert_eq!(result.name, "get_weather");
        assert_eq!(result.response, json!({"temp": 3}));
        assert_eq!(backend.contents[3].parts[0].text.as_deref(), Some("Late instruction"));

        let config = backend.generation_config.unwrap();
        assert_eq!(config.temperature, Some(0.3));
        assert_eq!(config.max_output_tokens, Some(256));
        assert_eq!(config.stop_sequences, Some(vec!["END".to_string()]));
        assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));

        let declaration = &backend.tools.unwrap()[0].function_declarations[0];
        assert_eq!(declaration.parameters, Some(json!({"type": "object", "properties": {"city": {"type": "string"}}})));

        let calling = backend.tool_config.unwrap().function_calling_config;
        assert_eq!(calling.mode, "ANY");
        assert_eq!(calling.allowed_function_names, Some(vec!["get_weather".to_string()]));
    }

    #[test]
    fn test_tool_choice_modes() {
        for (choice, mode) in [("auto", "AUTO"), ("none", "NONE"), ("required", "ANY")] {
            let config = convert_tool_choice(&ToolChoice::Mode(choice.to_string())).unwrap();
            assert_eq!(config.function_calling_config.mode, mode);
            assert!(config.function_calling_config.allowed_function_names.is_none());
        }
    }

    #[test]
    fn test_tool_message_without_name_is_rejected() {
        let req = request(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "tool", "tool_call_id": "unknown", "content": "42"}
            ]
        }));
        let err = converter().to_backend(&req).unwrap_err();
        assert!(matches!(err, ProxyError::Translation(msg) if msg.contains("unknown")));
    }

    #[test]
    fn test_plain_tool_output_is_wrapped() {
        let req = request(json!({
            "model": "m",
            "messages": [
                {"role": "tool", "tool_call_id": "c9", "name": "lookup", "content": "plain text"}
            ]
        }));
        let backend = converter().to_backend(&req).unwrap();
        let response = backend.contents[0].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.response, json!({"result": "plain text"}));
    }

    #[test]
    fn test_image_data_uri() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,iVBORw0"}}
            ]}]
        }));
        let backend = converter().to_backend(&req).unwrap();
        let blob = backend.contents[0].parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, "iVBORw0");
        assert!(backend.generation_config.is_none());
    }

    #[test]
    fn test_stream_translation() {
        let mut translator = converter().stream_translator("m");
        let mut frames = Vec::new();
        for line in [
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}}"#,
            r#"{"response":{"candidates":[{"content":{"parts":[{"functionCall":{"name":"f","args":{}}}]}}]}}"#,
            r#"{"response":{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":1,"candidatesTokenCount":2,"totalTokenCount":3}}}"#,
        ] {
            frames.extend(translator.on_chunk(&parse_chunk(line).unwrap()));
        }
        frames.extend(translator.finish());
        assert!(translator.finish().is_empty());

        assert_eq!(frames.len(), 4);
        let first: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], "Hel");

        let second: Value = serde_json::from_str(&frames[1].data).unwrap();
        let call = &second["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert!(call["id"].as_str().unwrap().starts_with("call_"));

        let last: Value = serde_json::from_str(&frames[2].data).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(last["usage"]["total_tokens"], 3);
        assert!(frames[3].is_done());
        assert_eq!(frames.iter().filter(|f| f.is_done()).count(), 1);
    }

    #[test]
    fn test_stream_usage_after_finish_chunk() {
        let mut translator = converter().stream_translator("m");
        let mut frames = Vec::new();
        for line in [
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"hi"}]},"finishReason":"STOP"}]}}"#,
            r#"{"response":{"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":1,"totalTokenCount":5}}}"#,
        ] {
            frames.extend(translator.on_chunk(&parse_chunk(line).unwrap()));
        }
        frames.extend(translator.finish());

        assert_eq!(frames.len(), 3);
        let first: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(first["choices"][0]["finish_reason"], "stop");
        assert!(first.get("usage").is_none());

        let usage: Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(usage["choices"], json!([]));
        assert_eq!(usage["usage"]["prompt_tokens"], 4);
        assert_eq!(usage["usage"]["total_tokens"], 5);
        assert_eq!(usage["id"], first["id"]);
        assert!(frames[2].is_done());
    }

    #[test]
    fn test_stream_error_is_terminal() {
        let mut translator = converter().stream_translator("m");
        let frames = translator.on_error(429, r#"{"error":{"message":"slow down"}}"#);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].data.contains("slow down"));
        assert!(frames[1].is_done());
        assert!(translator.finish().is_empty());
    }
}
