//! HTTP-level tests of the hosted and local LLM clients against a mock server.

use doc_harness::config::LlmConfig;
use doc_harness::llm::{ChatClient, HostedClient, LlmError, LocalClient, OCR_PROMPT};
use doc_harness::ocr::{ImageData, OcrBackend};
use doc_harness_core::models::ChatMessage;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(provider: &str, url: &str) -> LlmConfig {
    LlmConfig {
        provider: provider.into(),
        url: Some(url.into()),
        model: Some("test-model".into()),
        ..LlmConfig::default()
    }
}

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

#[tokio::test]
async fn hosted_chat_sends_key_and_joins_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/test-model:generateContent"))
        .and(query_param("key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "Revenue grew " },
                { "text": "[report.pdf]." }
            ] } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HostedClient::new(&config("hosted", &server.uri()), Some("secret".into())).unwrap();
    let history = [ChatMessage::user("hi"), ChatMessage::assistant("hello")];
    let reply = client.chat("What grew?", &history, "CTX").await.unwrap();
    assert_eq!(reply, "Revenue grew [report.pdf].");
}

#[tokio::test]
async fn hosted_error_prefers_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "API key not valid." }
        })))
        .mount(&server)
        .await;

    let client = HostedClient::new(&config("hosted", &server.uri()), Some("bad".into())).unwrap();
    match client.chat("q", &[], "ctx").await {
        Err(LlmError::Api { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "API key not valid.");
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn hosted_verify_lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(query_param("key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HostedClient::new(&config("hosted", &server.uri()), Some("secret".into())).unwrap();
    client.verify().await.unwrap();
}

#[tokio::test]
async fn hosted_ocr_sends_inline_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "contents": [{ "parts": [
                { "text": OCR_PROMPT },
                { "inline_data": { "mime_type": "image/png", "data": "AQID" } }
            ] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("  INVOICE 42 \n")))
        .expect(1)
        .mount(&server)
        .await;

    let client = HostedClient::new(&config("hosted", &server.uri()), Some("k".into())).unwrap();
    let text = client
        .recognize(&ImageData::new("image/png", vec![1, 2, 3]))
        .await
        .unwrap();
    assert_eq!(text, "INVOICE 42");
}

#[tokio::test]
async fn local_chat_posts_openai_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "From [notes.txt]." } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LocalClient::from_config(&config("local", &server.uri())).unwrap();
    let reply = client.chat("q", &[], "ctx").await.unwrap();
    assert_eq!(reply, "From [notes.txt].");
}

#[tokio::test]
async fn local_verify_hits_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = LocalClient::from_config(&config("local", &server.uri())).unwrap();
    let err = client.verify().await.unwrap_err();
    assert!(matches!(err, LlmError::Api { status: 503, .. }));
}

#[tokio::test]
async fn local_reply_without_choices_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = LocalClient::from_config(&config("local", &server.uri())).unwrap();
    let err = client.chat("q", &[], "ctx").await.unwrap_err();
    assert!(matches!(err, LlmError::InvalidResponse(_)));
}
