//! Translation between the unified model and the chat-completions wire
//! format.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::wire::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentPart, FunctionCall,
    ImageUrl, MessageContent, StreamOptions, ToolChoiceObject, ToolChoiceFunction, WireToolCall,
    WireUsage,
};
use crate::error::RouterError;
use crate::schema;
use crate::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, Provider, Role, StopReason,
    ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

pub(crate) fn request(
    req: &CompletionRequest,
    stream: bool,
) -> Result<ChatCompletionRequest, RouterError> {
    let mut out = ChatCompletionRequest {
        model: req.model.clone(),
        messages: messages(&req.messages)?,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
        stop: req.stop_sequences.clone(),
        response_format: req.response_format.as_ref().map(schema::to_openai),
        tools: schema::tools_to_openai(&req.tools),
        tool_choice: None,
        parallel_tool_calls: None,
    };

    if let Some(tc) = &req.tool_choice {
        out.tool_choice = Some(tool_choice(tc));
        if tc.disable_parallel_tool_use {
            out.parallel_tool_calls = Some(false);
        }
    }

    Ok(out)
}

fn messages(messages: &[Message]) -> Result<Vec<ChatMessage>, RouterError> {
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        // Tool messages become one wire message per tool_result block,
        // correlated by the original tool-use id.
        if msg.role == Role::Tool {
            for block in &msg.content {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = block
                {
                    if tool_use_id.is_empty() {
                        return Err(RouterError::invalid_request(
                            "tool result is missing its tool_use_id",
                        ));
                    }
                    out.push(ChatMessage {
                        role: "tool".into(),
                        content: Some(MessageContent::Text(content.clone())),
                        tool_calls: vec![],
                        tool_call_id: Some(tool_use_id.clone()),
                    });
                }
            }
            continue;
        }

        let has_tool_use = msg
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
        let has_images = msg
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }));

        if has_tool_use && msg.role == Role::Assistant {
            // Text and tool_use travel together on a single assistant
            // message, never as separate messages.
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(WireToolCall {
                            id: id.clone(),
                            kind: "function".into(),
                            function: FunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(input).unwrap_or_default(),
                            },
                            index: None,
                        });
                    }
                    _ => {}
                }
            }
            out.push(ChatMessage {
                role: role_name(msg.role).into(),
                content: (!text.is_empty()).then_some(MessageContent::Text(text)),
                tool_calls,
                tool_call_id: None,
            });
        } else if has_images || msg.content.len() > 1 {
            let mut parts = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text } => parts.push(ContentPart {
                        kind: "text".into(),
                        text: Some(text.clone()),
                        image_url: None,
                    }),
                    ContentBlock::Image {
                        url,
                        data,
                        media_type,
                    } => parts.push(ContentPart {
                        kind: "image_url".into(),
                        text: None,
                        image_url: Some(ImageUrl {
                            url: image_url(url.as_deref(), data.as_deref(), media_type.as_deref())?,
                        }),
                    }),
                    _ => {}
                }
            }
            out.push(ChatMessage {
                role: role_name(msg.role).into(),
                content: Some(MessageContent::Parts(parts)),
                tool_calls: vec![],
                tool_call_id: None,
            });
        } else {
            let mut text = String::new();
            for block in &msg.content {
                if let ContentBlock::Text { text: t } = block {
                    text.push_str(t);
                }
            }
            out.push(ChatMessage {
                role: role_name(msg.role).into(),
                content: Some(MessageContent::Text(text)),
                tool_calls: vec![],
                tool_call_id: None,
            });
        }
    }

    Ok(out)
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        // tool_result blocks are split out before this is reached
        Role::Tool => "user",
    }
}

/// This dialect only accepts data URLs for inline images, so the media type
/// is mandatory when synthesizing one.
fn image_url(
    url: Option<&str>,
    data: Option<&str>,
    media_type: Option<&str>,
) -> Result<String, RouterError> {
    if let Some(url) = url {
        return Ok(url.to_string());
    }
    if let Some(data) = data {
        let media_type = media_type.filter(|m| !m.is_empty()).ok_or_else(|| {
            RouterError::invalid_request("base64 image needs a media_type to build a data URL")
        })?;
        return Ok(format!("data:{media_type};base64,{data}"));
    }
    Err(RouterError::invalid_request(
        "image block has neither url nor data",
    ))
}

fn tool_choice(tc: &ToolChoice) -> Value {
    match &tc.mode {
        ToolChoiceMode::Auto => Value::String("auto".into()),
        ToolChoiceMode::Required => Value::String("required".into()),
        ToolChoiceMode::None => Value::String("none".into()),
        ToolChoiceMode::Tool { name } => serde_json::to_value(ToolChoiceObject {
            kind: "function".into(),
            function: ToolChoiceFunction { name: name.clone() },
        })
        .unwrap_or(Value::String("auto".into())),
    }
}

pub(crate) fn response(
    resp: &ChatCompletionResponse,
) -> Result<CompletionResponse, RouterError> {
    let choice = resp.choices.first().ok_or_else(|| {
        RouterError::server_error(Provider::OpenAi, "response contained no choices")
    })?;

    Ok(CompletionResponse {
        id: resp.id.clone(),
        provider: Provider::OpenAi,
        model: resp.model.clone(),
        content: content_blocks(&choice.message),
        stop_reason: stop_reason(choice.finish_reason.as_deref().unwrap_or("")),
        usage: resp.usage.as_ref().map(usage).unwrap_or_default(),
        tool_calls: tool_calls(&choice.message),
        created_at: DateTime::<Utc>::from_timestamp(resp.created, 0).unwrap_or_else(Utc::now),
    })
}

pub(crate) fn usage(wire: &WireUsage) -> Usage {
    Usage {
        input_tokens: wire.prompt_tokens,
        output_tokens: wire.completion_tokens,
        total_tokens: wire.total_tokens,
        cached_tokens: wire
            .prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .unwrap_or(0),
        reasoning_tokens: wire
            .completion_tokens_details
            .as_ref()
            .map(|d| d.reasoning_tokens)
            .unwrap_or(0),
    }
    .with_computed_total()
}

fn content_blocks(msg: &ChatMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    match &msg.content {
        Some(MessageContent::Text(text)) if !text.is_empty() => {
            blocks.push(ContentBlock::text(text));
        }
        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                if part.kind == "text" {
                    if let Some(text) = &part.text {
                        blocks.push(ContentBlock::text(text));
                    }
                }
            }
        }
        _ => {}
    }

    for tc in &msg.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            input: parse_arguments(&tc.function.arguments),
        });
    }

    blocks
}

fn tool_calls(msg: &ChatMessage) -> Vec<ToolCall> {
    msg.tool_calls
        .iter()
        .map(|tc| ToolCall {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            input: parse_arguments(&tc.function.arguments),
        })
        .collect()
}

/// Arguments arrive as a JSON string in this dialect.
pub(crate) fn parse_arguments(arguments: &str) -> Value {
    if arguments.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments).unwrap_or(Value::Null)
}

pub(crate) fn stop_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::End,
        "length" => StopReason::MaxTokens,
        "tool_calls" => StopReason::ToolUse,
        "content_filter" => StopReason::ContentFilter,
        _ => StopReason::End,
    }
}
