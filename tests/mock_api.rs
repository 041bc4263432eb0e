//! End-to-end tests against mock HTTP servers.
//!
//! Response bodies follow each provider's documented wire format; the
//! assertions exercise the full request → transform → HTTP → decode →
//! unified-response path.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchboard::provider::ProviderConfig;
use switchboard::{
    BatchRequest, BatchStatus, CompletionRequest, ErrorCode, Feature, JsonSchema, Message,
    Provider, ResponseFormat, Role, Router, StopReason, StreamEvent, StreamReader, Tool,
    UnsupportedFeaturePolicy,
};

fn openai_router(server: &MockServer) -> Router {
    Router::builder()
        .with_openai_config(ProviderConfig::new("test-key").with_base_url(server.uri()))
        .build()
        .unwrap()
}

fn anthropic_router(server: &MockServer) -> Router {
    Router::builder()
        .with_anthropic_config(ProviderConfig::new("test-key").with_base_url(server.uri()))
        .build()
        .unwrap()
}

fn gemini_router(server: &MockServer) -> Router {
    Router::builder()
        .with_gemini_config(ProviderConfig::new("test-key").with_base_url(server.uri()))
        .build()
        .unwrap()
}

fn user_request(provider: Provider, model: &str, text: &str) -> CompletionRequest {
    CompletionRequest::new(provider, model).with_messages(vec![Message::text(Role::User, text)])
}

// --- Completion ---

#[tokio::test]
async fn openai_basic_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let router = openai_router(&server);
    let resp = router
        .complete(&user_request(Provider::OpenAi, "gpt-4o-mini", "Say hello"))
        .await
        .unwrap();

    assert_eq!(resp.id, "chatcmpl-123");
    assert!(resp.text().contains("hello"));
    assert!(resp.usage.input_tokens > 0);
    assert!(resp.usage.output_tokens > 0);
    assert_eq!(resp.stop_reason, StopReason::End);
}

#[tokio::test]
async fn anthropic_basic_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku-20241022",
            "content": [{"type": "text", "text": "hello!"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 8, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let router = anthropic_router(&server);
    let resp = router
        .complete(&user_request(
            Provider::Anthropic,
            "claude-3-5-haiku-20241022",
            "Say hello",
        ))
        .await
        .unwrap();

    assert_eq!(resp.id, "msg_123");
    assert_eq!(resp.text(), "hello!");
    assert_eq!(resp.usage.total_tokens, 10);
}

#[tokio::test]
async fn gemini_basic_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "hello!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let router = gemini_router(&server);
    let resp = router
        .complete(&user_request(
            Provider::Gemini,
            "gemini-2.0-flash",
            "Say hello",
        ))
        .await
        .unwrap();

    assert_eq!(resp.text(), "hello!");
    assert_eq!(resp.model, "gemini-2.0-flash");
    assert_eq!(resp.usage.total_tokens, 6);
}

// --- Tool calling round trip ---

#[tokio::test]
async fn tool_call_round_trip() {
    let server = MockServer::start().await;

    // first turn: the model asks for the tool
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"tools": [{"name": "get_weather"}]})))
        .and(body_partial_json(
            json!({"messages": [{"role": "user", "content": "What's the weather in Paris?"}]}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_tool",
            "model": "claude-sonnet-4-20250514",
            "content": [{
                "type": "tool_use",
                "id": "toolu_1",
                "name": "get_weather",
                "input": {"location": "Paris"}
            }],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 15}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let router = anthropic_router(&server);
    let tool = Tool {
        name: "get_weather".into(),
        description: Some("Look up current weather".into()),
        parameters: JsonSchema::object(
            [("location", JsonSchema::of_type("string"))],
            &["location"],
        ),
    };

    let first = user_request(
        Provider::Anthropic,
        "claude-sonnet-4-20250514",
        "What's the weather in Paris?",
    )
    .with_tools(vec![tool.clone()]);
    let resp = router.complete(&first).await.unwrap();

    assert_eq!(resp.tool_calls.len(), 1);
    assert_eq!(resp.tool_calls[0].name, "get_weather");
    assert_eq!(resp.tool_calls[0].input["location"], "Paris");

    // second turn: append the assistant turn and the tool result
    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "user"},
                {"role": "assistant"},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_1"}]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_final",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "It is 18 degrees and cloudy in Paris."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 40, "output_tokens": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut messages = first.messages.clone();
    messages.push(Message {
        role: Role::Assistant,
        content: resp.content.clone(),
    });
    messages.push(Message::tool_result(
        "toolu_1",
        "{\"temperature\":18,\"condition\":\"Cloudy\"}",
        false,
    ));
    let follow_up = CompletionRequest::new(Provider::Anthropic, "claude-sonnet-4-20250514")
        .with_messages(messages)
        .with_tools(vec![tool]);

    let final_resp = router.complete(&follow_up).await.unwrap();
    let text = final_resp.text().to_lowercase();
    assert!(text.contains("18") || text.contains("cloudy"));
}

// --- Structured output ---

#[tokio::test]
async fn structured_output_parses_as_requested_schema() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": "person", "strict": true}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-s",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"name\":\"John Smith\",\"age\":42}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 15, "completion_tokens": 9, "total_tokens": 24}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let router = openai_router(&server);
    let req = user_request(Provider::OpenAi, "gpt-4o", "Extract: John Smith is 42")
        .with_json_schema(
            "person",
            JsonSchema::object(
                [
                    ("name", JsonSchema::of_type("string")),
                    ("age", JsonSchema::of_type("integer")),
                ],
                &["name", "age"],
            ),
        );

    let resp = router.complete(&req).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&resp.text()).unwrap();
    assert_eq!(parsed["name"], "John Smith");
    assert_eq!(parsed["age"], 42);
}

// --- Streaming ---

#[tokio::test]
async fn openai_streaming_over_http() {
    let body = concat!(
        "data: {\"id\":\"chatcmpl-st\",\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"1 2 \"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"3 4 5\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = openai_router(&server);
    let mut reader = router
        .stream(
            &user_request(Provider::OpenAi, "gpt-4o-mini", "Count 1 to 5")
                .with_max_tokens(50)
                .with_stream(),
        )
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = reader.next().await.unwrap() {
        events.push(event);
    }

    assert!(matches!(&events[0], StreamEvent::Start { .. }));
    let delta_count = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ContentDelta { .. }))
        .count();
    assert!(delta_count >= 1);
    assert!(matches!(events.last().unwrap(), StreamEvent::Done { .. }));

    let resp = reader.response().unwrap();
    assert_eq!(resp.text(), "1 2 3 4 5");
    assert_eq!(resp.usage.total_tokens, 15);
}

#[tokio::test]
async fn anthropic_streaming_over_http() {
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_st\",\"model\":\"claude-3-5-haiku-20241022\",\"content\":[],\"usage\":{\"input_tokens\":12,\"output_tokens\":0}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"1 2 3 \"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"4 5\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":7}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": true, "max_tokens": 50})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = anthropic_router(&server);
    let mut reader = router
        .stream(
            &user_request(Provider::Anthropic, "claude-3-5-haiku-20241022", "Count 1 to 5")
                .with_max_tokens(50)
                .with_stream(),
        )
        .await
        .unwrap();

    let mut starts = 0;
    let mut deltas = 0;
    let mut saw_done = false;
    let mut first_delta_after_start = false;
    while let Some(event) = reader.next().await.unwrap() {
        match event {
            StreamEvent::Start { .. } => starts += 1,
            StreamEvent::ContentDelta { .. } => {
                if starts == 1 {
                    first_delta_after_start = true;
                }
                deltas += 1;
            }
            StreamEvent::Done { .. } => saw_done = true,
            _ => {}
        }
    }

    assert_eq!(starts, 1);
    assert!(deltas >= 1);
    assert!(first_delta_after_start);
    assert!(saw_done);

    let text = reader.response().unwrap().text();
    let positions: Vec<_> = ["1", "2", "3", "4", "5"]
        .iter()
        .map(|d| text.find(*d).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "digits in order");
}

#[tokio::test]
async fn gemini_streaming_over_http() {
    let body = concat!(
        "[{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"hel\"}]}}]},\n",
        "{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}],",
        "\"usageMetadata\":{\"promptTokenCount\":2,\"candidatesTokenCount\":1,\"totalTokenCount\":3}}]",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:streamGenerateContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = gemini_router(&server);
    let mut reader = router
        .stream(&user_request(Provider::Gemini, "gemini-2.0-flash", "hi").with_stream())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = reader.next().await.unwrap() {
        events.push(event);
    }

    assert!(matches!(&events[0], StreamEvent::Start { .. }));
    assert!(matches!(events.last().unwrap(), StreamEvent::Done { .. }));
    assert_eq!(reader.response().unwrap().text(), "hello");
}

// --- Error mapping ---

#[tokio::test]
async fn http_status_mapping() {
    let server = MockServer::start().await;
    let router = openai_router(&server);
    let req = user_request(Provider::OpenAi, "gpt-4o", "hi");

    for (status, body, expected) in [
        (
            401,
            json!({"error": {"message": "bad key", "type": "invalid_request_error"}}),
            ErrorCode::InvalidApiKey,
        ),
        (
            429,
            json!({"error": {"message": "slow down", "type": "rate_limit_error"}}),
            ErrorCode::RateLimit,
        ),
        (
            404,
            json!({"error": {"message": "no such model", "type": "invalid_request_error"}}),
            ErrorCode::ModelNotFound,
        ),
        (
            400,
            json!({"error": {"message": "maximum context length exceeded", "type": "invalid_request_error"}}),
            ErrorCode::ContextLength,
        ),
        (
            400,
            json!({"error": {"message": "missing field", "type": "invalid_request_error"}}),
            ErrorCode::InvalidRequest,
        ),
        (
            500,
            json!({"error": {"message": "boom", "type": "server_error"}}),
            ErrorCode::ServerError,
        ),
    ] {
        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;

        let err = router.complete(&req).await.unwrap_err();
        assert_eq!(err.code(), expected, "status {status}");
        assert_eq!(err.provider(), Some(Provider::OpenAi));
    }
}

// --- Router policy ---

#[tokio::test]
async fn unsupported_feature_error_policy_issues_no_http() {
    let server = MockServer::start().await;
    // any request reaching the server is a failure
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let router = Router::builder()
        .with_anthropic_config(ProviderConfig::new("test-key").with_base_url(server.uri()))
        .with_unsupported_feature_policy(UnsupportedFeaturePolicy::Error)
        .build()
        .unwrap();

    let mut req = user_request(Provider::Anthropic, "claude-3-5-haiku-20241022", "hi");
    req.response_format = Some(ResponseFormat::Json);

    let err = router.complete(&req).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedFeature);
    assert!(!router.supports_feature(Provider::Anthropic, Feature::JsonMode));
}

// --- Batch lifecycle (file-upload shape) ---

#[tokio::test]
async fn openai_batch_lifecycle() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-in",
            "object": "file",
            "purpose": "batch",
            "filename": "batch_input.jsonl"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/batches"))
        .and(body_partial_json(json!({
            "input_file_id": "file-in",
            "endpoint": "/v1/chat/completions",
            "completion_window": "24h"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "batch_1",
            "endpoint": "/v1/chat/completions",
            "input_file_id": "file-in",
            "status": "validating",
            "created_at": 1700000000,
            "request_counts": {"total": 2, "completed": 0, "failed": 0}
        })))
        .expect(1)
        .mount(&server)
        .await;

    // first poll still running, second poll complete
    Mock::given(method("GET"))
        .and(path("/batches/batch_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "batch_1",
            "endpoint": "/v1/chat/completions",
            "input_file_id": "file-in",
            "status": "in_progress",
            "created_at": 1700000000
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batches/batch_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "batch_1",
            "endpoint": "/v1/chat/completions",
            "input_file_id": "file-in",
            "output_file_id": "file-out",
            "status": "completed",
            "created_at": 1700000000,
            "completed_at": 1700003600,
            "request_counts": {"total": 2, "completed": 2, "failed": 0}
        })))
        .mount(&server)
        .await;

    let output = concat!(
        "{\"id\":\"l1\",\"custom_id\":\"r1\",\"response\":{\"status_code\":200,\"body\":{\"id\":\"c1\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"message\":{\"role\":\"assistant\",\"content\":\"four\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":1,\"total_tokens\":5}}}}\n",
        "{\"id\":\"l2\",\"custom_id\":\"r2\",\"error\":{\"message\":\"failed to process\"}}\n",
    );
    Mock::given(method("GET"))
        .and(path("/files/file-out/content"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(output.as_bytes().to_vec(), "application/jsonl"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = openai_router(&server);
    let requests = vec![
        BatchRequest::new(
            "r1",
            user_request(Provider::OpenAi, "gpt-4o-mini", "What is 2+2?"),
        ),
        BatchRequest::new(
            "r2",
            user_request(Provider::OpenAi, "gpt-4o-mini", "What is 3+3?"),
        ),
    ];

    let job = router
        .batch()
        .create(Provider::OpenAi, &requests)
        .await
        .unwrap();
    assert_eq!(job.id, "batch_1");
    assert_eq!(job.status, BatchStatus::Validating);
    assert_eq!(job.counts.total, 2);

    let cancel = CancellationToken::new();
    let done = router
        .batch()
        .wait(
            Provider::OpenAi,
            "batch_1",
            Duration::from_millis(5),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(done.status, BatchStatus::Completed);

    let results = router
        .batch()
        .get_results(Provider::OpenAi, "batch_1")
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    let r1 = results.iter().find(|r| r.custom_id == "r1").unwrap();
    assert_eq!(r1.response().unwrap().text(), "four");
    let r2 = results.iter().find(|r| r.custom_id == "r2").unwrap();
    assert!(r2.error().unwrap().message().contains("failed to process"));
}

// --- Batch lifecycle (inline + results URL shape) ---

#[tokio::test]
async fn anthropic_batch_results_from_url() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msgbatch_1",
            "processing_status": "ended",
            "request_counts": {"processing": 0, "succeeded": 1, "errored": 0, "canceled": 0, "expired": 0},
            "created_at": "2025-06-01T10:00:00Z",
            "ended_at": "2025-06-01T10:30:00Z",
            "results_url": format!("{}/v1/messages/batches/msgbatch_1/results", server.uri())
        })))
        .mount(&server)
        .await;

    let results_body = "{\"custom_id\":\"r1\",\"result\":{\"type\":\"succeeded\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-3-5-haiku-20241022\",\"content\":[{\"type\":\"text\",\"text\":\"done\"}],\"stop_reason\":\"end_turn\",\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}}}\n";
    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_1/results"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(results_body.as_bytes().to_vec(), "application/jsonl"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = anthropic_router(&server);
    let results = router
        .batch()
        .get_results(Provider::Anthropic, "msgbatch_1")
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].custom_id, "r1");
    assert_eq!(results[0].response().unwrap().text(), "done");
}

// --- Batch lifecycle (long-running operation shape) ---

#[tokio::test]
async fn gemini_batch_inline_results() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:batchGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "batches/op1",
            "done": false,
            "metadata": {"state": "BATCH_STATE_RUNNING"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/batches/op1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "batches/op1",
            "done": true,
            "response": {
                "inlinedResponses": {
                    "inlinedResponses": [{
                        "metadata": {"key": "r1"},
                        "response": {
                            "candidates": [{
                                "content": {"role": "model", "parts": [{"text": "inline result"}]},
                                "finishReason": "STOP"
                            }]
                        }
                    }]
                }
            }
        })))
        .mount(&server)
        .await;

    let router = gemini_router(&server);
    let job = router
        .batch()
        .create(
            Provider::Gemini,
            &[BatchRequest::new(
                "r1",
                user_request(Provider::Gemini, "gemini-2.0-flash", "hi"),
            )],
        )
        .await
        .unwrap();
    assert_eq!(job.id, "batches/op1");
    assert_eq!(job.status, BatchStatus::InProgress);

    let fetched = router
        .batch()
        .get(Provider::Gemini, "op1")
        .await
        .unwrap();
    assert_eq!(fetched.status, BatchStatus::Completed);

    let results = router
        .batch()
        .get_results(Provider::Gemini, "op1")
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].custom_id, "r1");
    assert_eq!(results[0].response().unwrap().text(), "inline result");
}

// --- Cancelled stream keeps partial state over real HTTP ---

#[tokio::test]
async fn cancelled_stream_returns_partial_accumulation() {
    let body = concat!(
        "data: {\"id\":\"chatcmpl-c\",\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial \"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"rest\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let router = openai_router(&server);
    let cancel = CancellationToken::new();
    let mut reader = router
        .stream_with_cancel(
            &user_request(Provider::OpenAi, "gpt-4o-mini", "hi").with_stream(),
            cancel.clone(),
        )
        .await
        .unwrap();

    assert!(matches!(
        reader.next().await.unwrap(),
        Some(StreamEvent::Start { .. })
    ));
    assert!(matches!(
        reader.next().await.unwrap(),
        Some(StreamEvent::ContentDelta { .. })
    ));

    cancel.cancel();
    let err = reader.next().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);

    assert_eq!(reader.response().unwrap().text(), "partial ");
    assert!(reader.next().await.unwrap().is_none());
}
