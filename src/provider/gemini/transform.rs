//! Translation between the unified model and the generateContent wire
//! format.

use chrono::Utc;
use serde_json::Value;

use super::wire::{
    Content, FileData, FunctionCall, FunctionCallingConfig, FunctionResponse,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData, Part,
    ToolConfig, UsageMetadata,
};
use crate::error::RouterError;
use crate::schema;
use crate::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, Provider, Role, StopReason,
    ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

pub(crate) fn request(req: &CompletionRequest) -> Result<GenerateContentRequest, RouterError> {
    let (contents, system_instruction) = messages(&req.messages)?;

    let mut config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        max_output_tokens: req.max_tokens,
        stop_sequences: req.stop_sequences.clone(),
        response_mime_type: None,
        response_schema: None,
    };
    if let Some(output) = req.response_format.as_ref().and_then(schema::to_gemini) {
        config.response_mime_type = Some(output.response_mime_type);
        config.response_schema = output.response_schema;
    }

    Ok(GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(config),
        safety_settings: vec![],
        tools: schema::tools_to_gemini(&req.tools).into_iter().collect(),
        tool_config: req.tool_choice.as_ref().map(tool_choice),
    })
}

fn messages(messages: &[Message]) -> Result<(Vec<Content>, Option<Content>), RouterError> {
    let mut contents = Vec::new();
    let mut system_parts = Vec::new();

    for msg in messages {
        if msg.role == Role::System {
            for block in &msg.content {
                if let ContentBlock::Text { text } = block {
                    system_parts.push(Part {
                        text: Some(text.clone()),
                        ..Default::default()
                    });
                }
            }
            continue;
        }

        contents.push(Content {
            role: Some(role_name(msg.role).into()),
            parts: parts(&msg.content)?,
        });
    }

    let system_instruction = (!system_parts.is_empty()).then_some(Content {
        role: None,
        parts: system_parts,
    });

    Ok((contents, system_instruction))
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::Tool => "user",
        Role::System => "user",
    }
}

fn parts(blocks: &[ContentBlock]) -> Result<Vec<Part>, RouterError> {
    let mut out = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => out.push(Part {
                text: Some(text.clone()),
                ..Default::default()
            }),
            ContentBlock::Image {
                url,
                data,
                media_type,
            } => {
                if let Some(data) = data {
                    out.push(Part {
                        inline_data: Some(InlineData {
                            mime_type: media_type.clone().unwrap_or_default(),
                            data: data.clone(),
                        }),
                        ..Default::default()
                    });
                } else if let Some(url) = url {
                    out.push(Part {
                        file_data: Some(FileData {
                            mime_type: media_type.clone().unwrap_or_default(),
                            file_uri: url.clone(),
                        }),
                        ..Default::default()
                    });
                } else {
                    return Err(RouterError::invalid_request(
                        "image block has neither url nor data",
                    ));
                }
            }
            ContentBlock::ToolUse { name, input, .. } => out.push(Part {
                function_call: Some(FunctionCall {
                    name: name.clone(),
                    args: input.clone(),
                }),
                ..Default::default()
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                if tool_use_id.is_empty() {
                    return Err(RouterError::invalid_request(
                        "tool result is missing its tool_use_id",
                    ));
                }
                // tool output becomes a JSON object; plain text is wrapped
                let response: Value = serde_json::from_str(content)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| serde_json::json!({"result": content}));
                out.push(Part {
                    function_response: Some(FunctionResponse {
                        // the wire correlates tool results by function name,
                        // which this protocol equates with the call id
                        name: tool_use_id.clone(),
                        response,
                    }),
                    ..Default::default()
                });
            }
        }
    }

    Ok(out)
}

fn tool_choice(tc: &ToolChoice) -> ToolConfig {
    let (mode, allowed) = match &tc.mode {
        ToolChoiceMode::Auto => ("AUTO", vec![]),
        ToolChoiceMode::Required => ("ANY", vec![]),
        ToolChoiceMode::None => ("NONE", vec![]),
        ToolChoiceMode::Tool { name } => ("ANY", vec![name.clone()]),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.into(),
            allowed_function_names: allowed,
        },
    }
}

/// The wire carries no response id or model; the caller's model name is
/// stamped on afterwards.
pub(crate) fn response(
    resp: &GenerateContentResponse,
    model: &str,
) -> Result<CompletionResponse, RouterError> {
    let candidate = resp.candidates.first().ok_or_else(|| {
        RouterError::server_error(Provider::Gemini, "response contained no candidates")
    })?;

    let content = candidate
        .content
        .as_ref()
        .map(response_content)
        .unwrap_or_default();
    let tool_calls = candidate
        .content
        .as_ref()
        .map(extract_tool_calls)
        .unwrap_or_default();

    Ok(CompletionResponse {
        id: String::new(),
        provider: Provider::Gemini,
        model: model.to_string(),
        content,
        stop_reason: stop_reason(candidate.finish_reason.as_deref().unwrap_or("")),
        usage: resp.usage_metadata.as_ref().map(usage).unwrap_or_default(),
        tool_calls,
        created_at: Utc::now(),
    })
}

pub(crate) fn usage(wire: &UsageMetadata) -> Usage {
    Usage {
        input_tokens: wire.prompt_token_count,
        output_tokens: wire.candidates_token_count,
        total_tokens: wire.total_token_count,
        ..Default::default()
    }
    .with_computed_total()
}

fn response_content(content: &Content) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for part in &content.parts {
        if let Some(text) = &part.text {
            if !text.is_empty() {
                blocks.push(ContentBlock::text(text));
            }
        }
        if let Some(call) = &part.function_call {
            // this wire has no call ids; the function name correlates
            blocks.push(ContentBlock::ToolUse {
                id: call.name.clone(),
                name: call.name.clone(),
                input: call.args.clone(),
            });
        }
    }
    blocks
}

fn extract_tool_calls(content: &Content) -> Vec<ToolCall> {
    content
        .parts
        .iter()
        .filter_map(|part| part.function_call.as_ref())
        .map(|call| ToolCall {
            id: call.name.clone(),
            name: call.name.clone(),
            input: call.args.clone(),
        })
        .collect()
}

pub(crate) fn stop_reason(reason: &str) -> StopReason {
    match reason {
        "STOP" => StopReason::End,
        "MAX_TOKENS" => StopReason::MaxTokens,
        "SAFETY" | "RECITATION" => StopReason::ContentFilter,
        _ => StopReason::End,
    }
}
