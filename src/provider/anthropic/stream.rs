//! Stream reader for the typed SSE framing (`event:` + `data:` pairs).
//!
//! Per-block state accumulates either text or partial-JSON tool input;
//! `content_block_stop` finalizes a tool block into a completed call.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::transform;
use super::wire::{ApiError, MessagesResponse, WireBlock, WireUsage};
use crate::error::RouterError;
use crate::provider::sse::EventStream;
use crate::types::{
    CompletionResponse, ContentBlock, Provider, StopReason, StreamEvent, StreamReader, ToolCall,
    Usage,
};

#[derive(Debug)]
enum BlockState {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        /// Input object from `content_block_start`, used when no deltas
        /// arrive (empty-argument tools).
        initial: Option<Value>,
        json: String,
    },
}

#[derive(Deserialize)]
struct MessageStartPayload {
    message: MessagesResponse,
}

#[derive(Deserialize)]
struct BlockStartPayload {
    index: usize,
    content_block: WireBlock,
}

#[derive(Default, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct BlockDeltaPayload {
    index: usize,
    delta: DeltaPayload,
}

#[derive(Deserialize)]
struct BlockStopPayload {
    index: usize,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    #[serde(default)]
    delta: DeltaPayload,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: ApiError,
}

pub(crate) struct AnthropicStreamReader {
    events: EventStream,
    pending: VecDeque<StreamEvent>,
    cancel: Option<CancellationToken>,
    done: bool,

    id: String,
    model: String,
    blocks: Vec<BlockState>,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
    have_usage: bool,
    stop_reason: StopReason,
    response: Option<CompletionResponse>,
}

impl AnthropicStreamReader {
    pub(crate) fn new(events: EventStream) -> Self {
        Self {
            events,
            pending: VecDeque::new(),
            cancel: None,
            done: false,
            id: String::new(),
            model: String::new(),
            blocks: Vec::new(),
            tool_calls: Vec::new(),
            usage: Usage::default(),
            have_usage: false,
            stop_reason: StopReason::End,
            response: None,
        }
    }

    /// Handles one typed event; returns true when the stream is finished.
    fn process_event(&mut self, event_type: &str, data: &str) -> bool {
        match event_type {
            "message_start" => {
                let Ok(payload) = serde_json::from_str::<MessageStartPayload>(data) else {
                    return false;
                };
                self.id = payload.message.id;
                self.model = payload.message.model;
                self.usage.input_tokens = payload.message.usage.input_tokens;
                self.usage.cached_tokens = payload.message.usage.cache_read_input_tokens;
                self.have_usage = true;
                self.pending.push_back(StreamEvent::Start {
                    id: self.id.clone(),
                    model: self.model.clone(),
                });
            }

            "content_block_start" => {
                let Ok(payload) = serde_json::from_str::<BlockStartPayload>(data) else {
                    return false;
                };
                while self.blocks.len() <= payload.index {
                    self.blocks.push(BlockState::Text(String::new()));
                }
                if payload.content_block.kind == "tool_use" {
                    let id = payload.content_block.id.unwrap_or_default();
                    let name = payload.content_block.name.unwrap_or_default();
                    self.blocks[payload.index] = BlockState::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        initial: payload.content_block.input,
                        json: String::new(),
                    };
                    self.pending.push_back(StreamEvent::ToolCallStart {
                        index: payload.index,
                        call: ToolCall {
                            id,
                            name,
                            input: Value::Null,
                        },
                    });
                } else {
                    self.blocks[payload.index] =
                        BlockState::Text(payload.content_block.text.unwrap_or_default());
                }
            }

            "content_block_delta" => {
                let Ok(payload) = serde_json::from_str::<BlockDeltaPayload>(data) else {
                    return false;
                };
                if let Some(text) = payload.delta.text.filter(|t| !t.is_empty()) {
                    if let Some(BlockState::Text(acc)) = self.blocks.get_mut(payload.index) {
                        acc.push_str(&text);
                    }
                    self.pending.push_back(StreamEvent::ContentDelta {
                        index: payload.index,
                        delta: ContentBlock::text(text),
                    });
                } else if let Some(fragment) =
                    payload.delta.partial_json.filter(|j| !j.is_empty())
                {
                    if let Some(BlockState::ToolUse { json, .. }) =
                        self.blocks.get_mut(payload.index)
                    {
                        json.push_str(&fragment);
                    }
                    self.pending.push_back(StreamEvent::ToolCallDelta {
                        index: payload.index,
                        fragment,
                    });
                }
            }

            "content_block_stop" => {
                let Ok(payload) = serde_json::from_str::<BlockStopPayload>(data) else {
                    return false;
                };
                if let Some(BlockState::ToolUse {
                    id,
                    name,
                    initial,
                    json,
                }) = self.blocks.get(payload.index)
                {
                    let input = finalize_input(json, initial.as_ref());
                    let call = ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input,
                    };
                    self.tool_calls.push(call.clone());
                    self.pending.push_back(StreamEvent::ToolCallEnd {
                        index: payload.index,
                        call,
                    });
                }
            }

            "message_delta" => {
                let Ok(payload) = serde_json::from_str::<MessageDeltaPayload>(data) else {
                    return false;
                };
                if let Some(reason) = payload.delta.stop_reason.filter(|r| !r.is_empty()) {
                    self.stop_reason = transform::stop_reason(&reason);
                }
                if payload.usage.output_tokens > 0 {
                    self.usage.output_tokens = payload.usage.output_tokens;
                    self.have_usage = true;
                }
            }

            "message_stop" => {
                self.pending.push_back(StreamEvent::Done {
                    id: self.id.clone(),
                    stop_reason: self.stop_reason,
                    usage: self.final_usage(),
                });
                return true;
            }

            "error" => {
                let error = serde_json::from_str::<ErrorPayload>(data)
                    .map(|p| RouterError::server_error(Provider::Anthropic, p.error.message))
                    .unwrap_or_else(|_| {
                        RouterError::server_error(Provider::Anthropic, "stream error")
                    });
                self.pending.push_back(StreamEvent::Error { error });
                return true;
            }

            // ping and future event types are ignored
            _ => {}
        }
        false
    }

    fn final_usage(&self) -> Option<Usage> {
        self.have_usage.then(|| self.usage.with_computed_total())
    }

    fn build_response(&mut self) {
        let mut content = Vec::new();
        for state in &self.blocks {
            match state {
                BlockState::Text(text) => content.push(ContentBlock::text(text.clone())),
                BlockState::ToolUse {
                    id,
                    name,
                    initial,
                    json,
                } => content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: finalize_input(json, initial.as_ref()),
                }),
            }
        }

        self.response = Some(CompletionResponse {
            id: self.id.clone(),
            provider: Provider::Anthropic,
            model: self.model.clone(),
            content,
            stop_reason: self.stop_reason,
            usage: self.final_usage().unwrap_or_default(),
            tool_calls: self.tool_calls.clone(),
            created_at: Utc::now(),
        });
    }
}

fn finalize_input(json: &str, initial: Option<&Value>) -> Value {
    if !json.is_empty() {
        serde_json::from_str(json).unwrap_or(Value::Null)
    } else {
        initial
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

#[async_trait]
impl StreamReader for AnthropicStreamReader {
    async fn next(&mut self) -> Result<Option<StreamEvent>, RouterError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.done {
            return Ok(None);
        }
        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                self.done = true;
                self.build_response();
                return Err(RouterError::cancelled().with_provider(Provider::Anthropic));
            }
        }

        loop {
            match self.events.next().await {
                None => {
                    self.done = true;
                    self.build_response();
                    return Ok(None);
                }
                Some(Err(err)) => {
                    self.done = true;
                    self.build_response();
                    return Err(err);
                }
                Some(Ok(event)) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    let finished = self.process_event(&event.event, &event.data);
                    if finished {
                        self.done = true;
                        self.build_response();
                    }
                    if let Some(event) = self.pending.pop_front() {
                        return Ok(Some(event));
                    }
                    if finished {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn response(&self) -> Option<&CompletionResponse> {
        self.response.as_ref()
    }

    fn attach_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = Some(cancel);
    }
}
