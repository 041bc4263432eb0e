//! Unified request/response vocabulary shared by every provider adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RouterError;

/// A supported backend provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message roles in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tagged piece of message content.
///
/// Assistant messages are the only ones that may carry `ToolUse` blocks;
/// tool messages carry exactly `ToolResult` blocks; system messages carry
/// text only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// Inline base64 payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text { .. })
    }
}

/// A conversation message: a role plus ordered content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// A simple single-block text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// A tool message returning the output of a previous tool_use.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: output.into(),
                is_error,
            }],
        }
    }
}

/// A function the model may request to invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: JsonSchema,
}

/// A tool invocation extracted from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The unified JSON Schema dialect, translated per provider before hitting
/// the wire. Unknown fields are ignored on deserialize; property order is
/// not significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, JsonSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub const_value: Option<Value>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
    #[serde(rename = "minItems", default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(rename = "maxItems", default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "default", default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(rename = "anyOf", default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<JsonSchema>,
    #[serde(rename = "oneOf", default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<JsonSchema>,
    #[serde(rename = "allOf", default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<JsonSchema>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "$defs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defs: BTreeMap<String, JsonSchema>,
}

impl JsonSchema {
    /// A bare schema of the given type.
    pub fn of_type(schema_type: impl Into<String>) -> Self {
        Self {
            schema_type: Some(schema_type.into()),
            ..Default::default()
        }
    }

    /// An object schema with the given properties and required names.
    pub fn object(
        properties: impl IntoIterator<Item = (&'static str, JsonSchema)>,
        required: &[&str],
    ) -> Self {
        Self {
            schema_type: Some("object".into()),
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            required: required.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Projects the schema onto a JSON value tree for wire serialization.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    End,
    MaxTokens,
    ToolUse,
    StopSequence,
    ContentFilter,
}

/// Token usage for a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "u32_is_zero")]
    pub cached_tokens: u32,
    #[serde(default, skip_serializing_if = "u32_is_zero")]
    pub reasoning_tokens: u32,
}

fn u32_is_zero(v: &u32) -> bool {
    *v == 0
}

impl Usage {
    /// Fills in the total when the provider left it out.
    pub fn with_computed_total(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.input_tokens + self.output_tokens;
        }
        self
    }
}

/// A provider capability the router can check before dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Streaming,
    StructuredOutput,
    Tools,
    Vision,
    Batch,
    JsonMode,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Streaming => "streaming",
            Feature::StructuredOutput => "structured_output",
            Feature::Tools => "tools",
            Feature::Vision => "vision",
            Feature::Batch => "batch",
            Feature::JsonMode => "json_mode",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured-output directive on a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
    JsonSchema {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<JsonSchema>,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// Strict mode: output must match the schema exactly (OpenAI).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
}

/// How the model should use tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoiceMode {
    /// Model decides whether to use tools.
    Auto,
    /// Model must use at least one tool.
    Required,
    /// Model cannot use tools.
    None,
    /// Model must use this specific tool.
    Tool { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoice {
    #[serde(flatten)]
    pub mode: ToolChoiceMode,
    #[serde(default)]
    pub disable_parallel_tool_use: bool,
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self {
            mode: ToolChoiceMode::Auto,
            disable_parallel_tool_use: false,
        }
    }

    pub fn required() -> Self {
        Self {
            mode: ToolChoiceMode::Required,
            disable_parallel_tool_use: false,
        }
    }

    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            mode: ToolChoiceMode::Tool { name: name.into() },
            disable_parallel_tool_use: false,
        }
    }
}

/// The unified completion request, valid against any registered provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub provider: Provider,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Anthropic and Gemini only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_json_schema(mut self, name: impl Into<String>, schema: JsonSchema) -> Self {
        self.response_format = Some(ResponseFormat::JsonSchema {
            schema: Some(schema),
            name: name.into(),
            description: None,
            strict: Some(true),
        });
        self
    }

    pub fn with_stream(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// The unified completion response.
///
/// `tool_calls` mirrors the `ToolUse` blocks in `content`; the two are kept
/// consistent by every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub provider: Provider,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl CompletionResponse {
    /// Concatenated text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One normalized element in an incremental response stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// First event of every stream.
    Start { id: String, model: String },
    /// An incremental content addition at the given block index.
    ContentDelta { index: usize, delta: ContentBlock },
    /// A new tool call opened; `call.input` may still be empty.
    ToolCallStart { index: usize, call: ToolCall },
    /// A partial-JSON fragment of the tool call's arguments.
    ToolCallDelta { index: usize, fragment: String },
    /// A tool call finished with its fully parsed input.
    ToolCallEnd { index: usize, call: ToolCall },
    /// Terminal event on natural completion.
    Done {
        id: String,
        stop_reason: StopReason,
        usage: Option<Usage>,
    },
    /// Terminal event on provider-reported failure.
    Error { error: RouterError },
}

/// Single-consumer iterator over [`StreamEvent`]s backed by an open HTTP
/// body. The body is released when the reader is dropped.
#[async_trait]
pub trait StreamReader: Send {
    /// Returns the next event, or `Ok(None)` once the stream is complete.
    async fn next(&mut self) -> Result<Option<StreamEvent>, RouterError>;

    /// The response accumulated from the stream. `None` before termination;
    /// after cancellation this is the partial accumulation.
    fn response(&self) -> Option<&CompletionResponse>;

    /// Attaches a cancellation token; once it fires, `next` returns the
    /// cancellation error and `response` exposes the partial state.
    fn attach_cancel(&mut self, cancel: CancellationToken);
}

impl std::fmt::Debug for dyn StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader").finish_non_exhaustive()
    }
}
