//! Stream reader for the JSON-array framing.
//!
//! The body is one JSON array of chunk objects; elements are split off the
//! byte stream incrementally, so a chunk boundary may fall anywhere.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::transform;
use super::wire::StreamChunk;
use crate::error::RouterError;
use crate::provider::sse::ByteStream;
use crate::types::{
    CompletionResponse, ContentBlock, Provider, StopReason, StreamEvent, StreamReader, ToolCall,
    Usage,
};

/// Incremental splitter for a top-level JSON array. Strings and nesting are
/// tracked so element boundaries survive arbitrary chunking.
#[derive(Debug, Default)]
pub(crate) struct ArraySplitter {
    buf: Vec<u8>,
    started: bool,
    finished: bool,
}

impl ArraySplitter {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn finished(&self) -> bool {
        self.finished
    }

    /// Returns the next complete element as raw JSON text, or `None` when
    /// more bytes are needed (or the array has closed).
    pub(crate) fn next_element(&mut self) -> Option<String> {
        let mut pos = 0;

        // consume the opening bracket once
        if !self.started {
            while pos < self.buf.len() && self.buf[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= self.buf.len() {
                return None;
            }
            if self.buf[pos] != b'[' {
                // not an array at all; treat the remainder as one element
                self.started = true;
            } else {
                self.started = true;
                pos += 1;
            }
        }

        // skip separators
        while pos < self.buf.len()
            && (self.buf[pos].is_ascii_whitespace() || self.buf[pos] == b',')
        {
            pos += 1;
        }
        if pos >= self.buf.len() {
            self.buf.drain(..pos);
            return None;
        }
        if self.buf[pos] == b']' {
            self.finished = true;
            self.buf.clear();
            return None;
        }

        // scan one element, tracking strings and nesting depth
        let start = pos;
        let mut depth: i32 = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for i in pos..self.buf.len() {
            let b = self.buf[i];
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    if depth == 0 {
                        // closing bracket of the outer array mid-scan
                        end = Some(i);
                        break;
                    }
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                b',' if depth == 0 => {
                    end = Some(i);
                    break;
                }
                _ => {}
            }
        }

        let Some(end) = end else {
            // incomplete element; keep what we have
            self.buf.drain(..start);
            return None;
        };

        let element = String::from_utf8_lossy(&self.buf[start..end]).into_owned();
        self.buf.drain(..end);
        if element.trim().is_empty() {
            return self.next_element();
        }
        Some(element)
    }
}

pub(crate) struct GeminiStreamReader {
    bytes: ByteStream,
    splitter: ArraySplitter,
    pending: VecDeque<StreamEvent>,
    cancel: Option<CancellationToken>,
    done: bool,

    model: String,
    content: Vec<ContentBlock>,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    stop_reason: StopReason,
    response: Option<CompletionResponse>,
}

impl GeminiStreamReader {
    pub(crate) fn new(bytes: ByteStream, model: impl Into<String>) -> Self {
        let model = model.into();
        let mut pending = VecDeque::new();
        // this wire assigns no response id; the model comes from the request
        pending.push_back(StreamEvent::Start {
            id: String::new(),
            model: model.clone(),
        });
        Self {
            bytes,
            splitter: ArraySplitter::default(),
            pending,
            cancel: None,
            done: false,
            model,
            content: Vec::new(),
            tool_calls: Vec::new(),
            usage: None,
            stop_reason: StopReason::End,
            response: None,
        }
    }

    fn process_element(&mut self, raw: &str) {
        let chunk: StreamChunk = match serde_json::from_str(raw) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "skipping malformed stream element");
                return;
            }
        };

        // the last usage snapshot wins
        if let Some(meta) = &chunk.usage_metadata {
            self.usage = Some(transform::usage(meta));
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return;
        };

        if let Some(reason) = &candidate.finish_reason {
            if !reason.is_empty() {
                self.stop_reason = transform::stop_reason(reason);
            }
        }

        let Some(content) = candidate.content else {
            return;
        };

        for part in content.parts {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                // coalesce with a trailing text block
                match self.content.last_mut() {
                    Some(ContentBlock::Text { text: acc }) => acc.push_str(&text),
                    _ => self.content.push(ContentBlock::text(text.clone())),
                }
                self.pending.push_back(StreamEvent::ContentDelta {
                    index: self.content.len() - 1,
                    delta: ContentBlock::text(text),
                });
            }

            if let Some(call) = part.function_call {
                // arguments arrive fully parsed in this framing
                let call = ToolCall {
                    id: call.name.clone(),
                    name: call.name,
                    input: call.args,
                };
                self.tool_calls.push(call.clone());
                self.content.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
                self.pending.push_back(StreamEvent::ToolCallStart {
                    index: self.content.len() - 1,
                    call,
                });
            }
        }
    }

    fn build_response(&mut self) {
        self.response = Some(CompletionResponse {
            id: String::new(),
            provider: Provider::Gemini,
            model: self.model.clone(),
            content: self.content.clone(),
            stop_reason: self.stop_reason,
            usage: self.usage.unwrap_or_default(),
            tool_calls: self.tool_calls.clone(),
            created_at: Utc::now(),
        });
    }

    fn finish(&mut self) -> StreamEvent {
        self.done = true;
        self.build_response();
        StreamEvent::Done {
            id: String::new(),
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

#[async_trait]
impl StreamReader for GeminiStreamReader {
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
                return Err(RouterError::cancelled().with_provider(Provider::Gemini));
            }
        }

        loop {
            while let Some(raw) = self.splitter.next_element() {
                self.process_element(&raw);
                if let Some(event) = self.pending.pop_front() {
                    return Ok(Some(event));
                }
            }
            if self.splitter.finished() {
                return Ok(Some(self.finish()));
            }

            match self.bytes.next().await {
                None => {
                    // EOF counts as termination alongside the closing token
                    return Ok(Some(self.finish()));
                }
                Some(Err(err)) => {
                    self.done = true;
                    self.build_response();
                    return Err(err);
                }
                Some(Ok(bytes)) => self.splitter.push(&bytes),
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
