//! Translation between the unified model and the messages wire format.

use chrono::Utc;

use super::wire::{
    ImageSource, MessageContent, MessagesRequest, MessagesResponse, WireBlock, WireMessage,
    WireToolChoice, WireUsage,
};
use crate::error::RouterError;
use crate::schema;
use crate::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, Provider, Role, StopReason,
    ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

/// The wire contract requires max_tokens; this ceiling applies when the
/// unified request leaves it unset.
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub(crate) fn request(
    req: &CompletionRequest,
    stream: bool,
) -> Result<MessagesRequest, RouterError> {
    let (messages, system) = messages(&req.messages)?;

    Ok(MessagesRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences: req.stop_sequences.clone(),
        stream,
        tools: schema::tools_to_anthropic(&req.tools),
        tool_choice: req.tool_choice.as_ref().map(tool_choice),
        output_config: req.response_format.as_ref().and_then(schema::to_anthropic),
    })
}

/// Extracts system text to the dedicated channel; multiple system messages
/// concatenate with newlines in order.
fn messages(messages: &[Message]) -> Result<(Vec<WireMessage>, Option<String>), RouterError> {
    let mut out = Vec::new();
    let mut system = String::new();

    for msg in messages {
        if msg.role == Role::System {
            for block in &msg.content {
                if let ContentBlock::Text { text } = block {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(text);
                }
            }
            continue;
        }

        // a lone text block travels as a bare string
        let content = match msg.content.as_slice() {
            [ContentBlock::Text { text }] => MessageContent::Text(text.clone()),
            blocks => MessageContent::Blocks(content_blocks(blocks)?),
        };

        out.push(WireMessage {
            role: role_name(msg.role).into(),
            content,
        });
    }

    Ok((out, (!system.is_empty()).then_some(system)))
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Assistant => "assistant",
        // tool results render on the user side of the turn
        Role::User | Role::Tool => "user",
        Role::System => "user",
    }
}

fn content_blocks(blocks: &[ContentBlock]) -> Result<Vec<WireBlock>, RouterError> {
    let mut out = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => out.push(WireBlock {
                kind: "text".into(),
                text: Some(text.clone()),
                ..Default::default()
            }),
            ContentBlock::Image {
                url,
                data,
                media_type,
            } => {
                let source = if let Some(data) = data {
                    ImageSource {
                        kind: "base64".into(),
                        media_type: media_type.clone(),
                        data: Some(data.clone()),
                        url: None,
                    }
                } else if let Some(url) = url {
                    ImageSource {
                        kind: "url".into(),
                        media_type: None,
                        data: None,
                        url: Some(url.clone()),
                    }
                } else {
                    return Err(RouterError::invalid_request(
                        "image block has neither url nor data",
                    ));
                };
                out.push(WireBlock {
                    kind: "image".into(),
                    source: Some(source),
                    ..Default::default()
                });
            }
            ContentBlock::ToolUse { id, name, input } => out.push(WireBlock {
                kind: "tool_use".into(),
                id: Some(id.clone()),
                name: Some(name.clone()),
                input: Some(input.clone()),
                ..Default::default()
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                if tool_use_id.is_empty() {
                    return Err(RouterError::invalid_request(
                        "tool result is missing its tool_use_id",
                    ));
                }
                out.push(WireBlock {
                    kind: "tool_result".into(),
                    tool_use_id: Some(tool_use_id.clone()),
                    content: Some(content.clone()),
                    is_error: *is_error,
                    ..Default::default()
                });
            }
        }
    }

    Ok(out)
}

fn tool_choice(tc: &ToolChoice) -> WireToolChoice {
    let (kind, name) = match &tc.mode {
        ToolChoiceMode::Auto => ("auto", None),
        ToolChoiceMode::Required => ("any", None),
        ToolChoiceMode::None => ("none", None),
        ToolChoiceMode::Tool { name } => ("tool", Some(name.clone())),
    };
    WireToolChoice {
        kind: kind.into(),
        name,
        disable_parallel_tool_use: tc.disable_parallel_tool_use,
    }
}

pub(crate) fn response(resp: &MessagesResponse) -> CompletionResponse {
    CompletionResponse {
        id: resp.id.clone(),
        provider: Provider::Anthropic,
        model: resp.model.clone(),
        content: response_content(&resp.content),
        stop_reason: stop_reason(resp.stop_reason.as_deref().unwrap_or("")),
        usage: usage(&resp.usage),
        tool_calls: extract_tool_calls(&resp.content),
        created_at: Utc::now(),
    }
}

pub(crate) fn usage(wire: &WireUsage) -> Usage {
    Usage {
        input_tokens: wire.input_tokens,
        output_tokens: wire.output_tokens,
        cached_tokens: wire.cache_read_input_tokens,
        ..Default::default()
    }
    .with_computed_total()
}

fn response_content(blocks: &[WireBlock]) -> Vec<ContentBlock> {
    let mut out = Vec::new();
    for block in blocks {
        match block.kind.as_str() {
            "text" => out.push(ContentBlock::text(block.text.clone().unwrap_or_default())),
            "tool_use" => out.push(ContentBlock::ToolUse {
                id: block.id.clone().unwrap_or_default(),
                name: block.name.clone().unwrap_or_default(),
                input: block.input.clone().unwrap_or_default(),
            }),
            _ => {}
        }
    }
    out
}

fn extract_tool_calls(blocks: &[WireBlock]) -> Vec<ToolCall> {
    blocks
        .iter()
        .filter(|b| b.kind == "tool_use")
        .map(|b| ToolCall {
            id: b.id.clone().unwrap_or_default(),
            name: b.name.clone().unwrap_or_default(),
            input: b.input.clone().unwrap_or_default(),
        })
        .collect()
}

pub(crate) fn stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" => StopReason::End,
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        "stop_sequence" => StopReason::StopSequence,
        "refusal" => StopReason::ContentFilter,
        _ => StopReason::End,
    }
}
