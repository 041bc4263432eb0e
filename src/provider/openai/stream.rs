//! Stream reader for the SSE `data:`-line framing.
//!
//! Each `data:` payload is a JSON chunk; `data: [DONE]` terminates the
//! stream. Tool-call arguments arrive as string fragments keyed by index
//! and are accumulated until finalization.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::transform;
use super::wire::StreamChunk;
use crate::error::RouterError;
use crate::provider::sse::EventStream;
use crate::types::{
    CompletionResponse, ContentBlock, Provider, StopReason, StreamEvent, StreamReader, ToolCall,
    Usage,
};

pub(crate) struct OpenAiStreamReader {
    events: EventStream,
    pending: VecDeque<StreamEvent>,
    cancel: Option<CancellationToken>,
    done: bool,
    started: bool,

    id: String,
    model: String,
    text: String,
    calls: BTreeMap<usize, ToolCall>,
    args: BTreeMap<usize, String>,
    usage: Option<Usage>,
    stop_reason: StopReason,
    response: Option<CompletionResponse>,
}

impl OpenAiStreamReader {
    pub(crate) fn new(events: EventStream) -> Self {
        Self {
            events,
            pending: VecDeque::new(),
            cancel: None,
            done: false,
            started: false,
            id: String::new(),
            model: String::new(),
            text: String::new(),
            calls: BTreeMap::new(),
            args: BTreeMap::new(),
            usage: None,
            stop_reason: StopReason::End,
            response: None,
        }
    }

    fn process_chunk(&mut self, chunk: StreamChunk) {
        if self.id.is_empty() && !chunk.id.is_empty() {
            self.id = chunk.id.clone();
        }
        if self.model.is_empty() && !chunk.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if !self.started {
            self.started = true;
            self.pending.push_back(StreamEvent::Start {
                id: self.id.clone(),
                model: self.model.clone(),
            });
        }

        // last usage snapshot wins (arrives with the final chunk)
        if let Some(usage) = &chunk.usage {
            self.usage = Some(transform::usage(usage));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(reason) = &choice.finish_reason {
            if !reason.is_empty() {
                self.stop_reason = transform::stop_reason(reason);
            }
        }

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.text.push_str(&content);
                self.pending.push_back(StreamEvent::ContentDelta {
                    index: 0,
                    delta: ContentBlock::text(content),
                });
            }
        }

        for tc in choice.delta.tool_calls {
            let index = tc.index.unwrap_or(0);

            // an id marks the first chunk for this index
            if !tc.id.is_empty() {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input: serde_json::Value::Null,
                };
                self.calls.insert(index, call.clone());
                self.args.insert(index, String::new());
                self.pending
                    .push_back(StreamEvent::ToolCallStart { index, call });
                continue;
            }

            if !tc.function.arguments.is_empty() {
                if let Some(acc) = self.args.get_mut(&index) {
                    acc.push_str(&tc.function.arguments);
                }
                self.pending.push_back(StreamEvent::ToolCallDelta {
                    index,
                    fragment: tc.function.arguments,
                });
            }
        }
    }

    fn build_response(&mut self) {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::text(self.text.clone()));
        }

        let mut tool_calls = Vec::new();
        for (index, call) in &self.calls {
            let mut call = call.clone();
            if let Some(args) = self.args.get(index) {
                call.input = transform::parse_arguments(args);
            }
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
            tool_calls.push(call);
        }

        self.response = Some(CompletionResponse {
            id: self.id.clone(),
            provider: Provider::OpenAi,
            model: self.model.clone(),
            content,
            stop_reason: self.stop_reason,
            usage: self.usage.unwrap_or_default(),
            tool_calls,
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl StreamReader for OpenAiStreamReader {
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
                return Err(RouterError::cancelled().with_provider(Provider::OpenAi));
            }
        }

        loop {
            match self.events.next().await {
                None => {
                    // body ended without the [DONE] sentinel
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
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        self.done = true;
                        self.build_response();
                        return Ok(Some(StreamEvent::Done {
                            id: self.id.clone(),
                            stop_reason: self.stop_reason,
                            usage: self.usage,
                        }));
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => self.process_chunk(chunk),
                        Err(err) => {
                            warn!(error = %err, "skipping malformed stream chunk");
                            continue;
                        }
                    }

                    if let Some(event) = self.pending.pop_front() {
                        return Ok(Some(event));
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
