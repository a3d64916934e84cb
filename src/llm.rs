//! LLM chat clients.
//!
//! Two wire formats behind one [`ChatClient`] trait, chosen once from
//! `[llm] provider`:
//!
//! - `hosted`: Google Gemini `models/{model}:generateContent`, API key
//!   read from the environment variable named by `llm.api_key_env`.
//! - `local`: an OpenAI-compatible `/v1/chat/completions` server (e.g. a
//!   local llama.cpp or vLLM instance).
//!
//! Both clients also implement [`OcrBackend`] using the model's vision
//! input, so `[ocr] provider = "llm"` reuses the chat configuration.
//!
//! Errors propagate unchanged; there are no automatic retries. The request
//! timeout is `llm.timeout_secs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use doc_harness_core::models::{ChatMessage, Role};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::ocr::{ImageData, OcrBackend, OcrError};

pub const DEFAULT_SYSTEM_PROMPT: &str = concat!(
    "You are an AI assistant that helps users understand their documents. ",
    "Analyze the provided context from ALL the user's documents and answer questions based on that information. ",
    "When analyzing images or PDFs, use OCR to extract and understand all visible text and content. ",
    "You may also use your general knowledge to provide more comprehensive answers. ",
    "When providing information not found in the user's documents, clearly indicate this with phrases like 'Based on my knowledge...' or 'According to external information...' ",
    "If relevant, provide citations by including the document name in [brackets] after relevant information. ",
    "If a user asks about which document(s) contain specific content or keywords, list all matching documents with their names in [brackets]. ",
    "IMPORTANT: When referencing document names in your response, always use the EXACT document names as provided in the source list so they can be properly linked. ",
    "If you're uncertain about something, acknowledge this rather than making up information. ",
    "Use HTML tags for formatting: <b>bold</b>, <i>italic</i>, <u>underline</u>, <ol><li>numbered lists</li></ol>, <ul><li>bullet lists</li></ul>. ",
    "DO NOT use markdown formatting like **, __, ##, etc. Always use proper HTML tags instead. ",
    "Use hyperlinks where possible when referencing external sources to help users find more information: <a href='URL'>link text</a>."
);

pub const OCR_PROMPT: &str = "Extract all visible text from this image using OCR. Return only the extracted text, nothing else. Be thorough and extract ALL text visible in the image, including small text, headers, captions, and any text in diagrams or figures.";

pub const DEFAULT_HOSTED_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_HOSTED_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:8000";
pub const DEFAULT_LOCAL_MODEL: &str = "llama-3.2-8b";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not set. Export {0} to use the hosted provider.")]
    MissingApiKey(String),

    #[error("local server URL not configured")]
    MissingServerUrl,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response format: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    fn name(&self) -> &str;

    /// Sends one turn. `context` is the assembled prompt context text.
    async fn chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        context: &str,
    ) -> Result<String, LlmError>;

    /// Cheap connectivity check.
    async fn verify(&self) -> Result<(), LlmError>;

    /// Local preconditions for a chat call (credentials, settings). No
    /// network access.
    fn ready(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

/// Builds the configured chat client. `None` when the provider is disabled.
pub fn create_client(config: &LlmConfig) -> anyhow::Result<Option<Arc<dyn ChatClient>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "hosted" => Ok(Some(Arc::new(HostedClient::from_config(config)?))),
        "local" => Ok(Some(Arc::new(LocalClient::from_config(config)?))),
        other => bail!("Unknown llm provider: '{}'", other),
    }
}

/// Builds the configured client as an OCR backend.
pub fn create_ocr_client(config: &LlmConfig) -> anyhow::Result<Arc<dyn OcrBackend>> {
    match config.provider.as_str() {
        "hosted" => Ok(Arc::new(HostedClient::from_config(config)?)),
        "local" => Ok(Arc::new(LocalClient::from_config(config)?)),
        other => bail!("LLM OCR needs a hosted or local llm provider, got '{}'", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Turns a non-2xx response into [`LlmError::Api`], preferring the
/// provider's `error.message`.
async fn api_error(response: reqwest::Response, fallback: &str) -> LlmError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                fallback.to_string()
            } else {
                body
            }
        });
    LlmError::Api { status, message }
}

// ═══════════════════════════════════════════════════════════════════════
// Hosted (Gemini)
// ═══════════════════════════════════════════════════════════════════════

pub struct HostedClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl HostedClient {
    /// Reads the API key from `config.api_key_env`. A missing key is
    /// reported on first use, before any request is sent.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_HOSTED_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_HOSTED_MODEL.to_string()),
            api_key,
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingApiKey(self.api_key_env.clone()))
    }

    async fn generate(&self, body: &Value) -> Result<String, LlmError> {
        let key = self.key()?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(&url)
            .query(&[("key", key)])
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response, "Failed to get response from the hosted model").await);
        }
        let json: Value = response.json().await?;
        parse_gemini_response(&json)
    }
}

/// Request body: system prompt, context, history, then the question.
pub fn gemini_chat_body(
    message: &str,
    history: &[ChatMessage],
    context: &str,
    temperature: f32,
    max_output_tokens: u32,
) -> Value {
    let mut contents = vec![
        json!({ "role": "user", "parts": [{ "text": DEFAULT_SYSTEM_PROMPT }] }),
        json!({ "role": "user", "parts": [{ "text": context }] }),
    ];
    contents.extend(history.iter().map(|m| {
        let role = match m.role {
            Role::Assistant => "model",
            Role::User => "user",
        };
        json!({ "role": role, "parts": [{ "text": m.text }] })
    }));
    contents.push(json!({ "role": "user", "parts": [{ "text": message }] }));
    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": temperature,
            "maxOutputTokens": max_output_tokens,
        }
    })
}

fn parse_gemini_response(json: &Value) -> Result<String, LlmError> {
    let parts = json["candidates"][0]["content"]["parts"]
        .as_array()
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("missing candidates[0].content.parts".into()))?;
    Ok(parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join(""))
}

#[async_trait]
impl ChatClient for HostedClient {
    fn name(&self) -> &str {
        "hosted"
    }

    async fn chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        context: &str,
    ) -> Result<String, LlmError> {
        let body = gemini_chat_body(
            message,
            history,
            context,
            self.temperature,
            self.max_output_tokens,
        );
        debug!(model = %self.model, turns = history.len(), "sending hosted chat request");
        let text = self.generate(&body).await?;
        info!("hosted model replied with {} characters", text.len());
        Ok(text)
    }

    fn ready(&self) -> Result<(), LlmError> {
        self.key().map(|_| ())
    }

    async fn verify(&self) -> Result<(), LlmError> {
        let key = self.key()?;
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .query(&[("key", key)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response, "API key verification failed").await);
        }
        Ok(())
    }
}

#[async_trait]
impl OcrBackend for HostedClient {
    fn name(&self) -> &str {
        "hosted-vision"
    }

    async fn recognize(&self, image: &ImageData) -> Result<String, OcrError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": OCR_PROMPT },
                    { "inline_data": {
                        "mime_type": image.mime_type,
                        "data": general_purpose::STANDARD.encode(&image.bytes),
                    } }
                ]
            }],
            "generationConfig": { "temperature": 0.0, "maxOutputTokens": self.max_output_tokens }
        });
        let text = self.generate(&body).await?;
        debug!(chars = text.len(), "hosted OCR finished");
        Ok(text.trim().to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Local (OpenAI-compatible)
// ═══════════════════════════════════════════════════════════════════════

pub struct LocalClient {
    http: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl LocalClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_URL.to_string());
        if url.trim().is_empty() {
            return Err(LlmError::MissingServerUrl);
        }
        Ok(Self {
            http: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    async fn complete(&self, body: &Value) -> Result<String, LlmError> {
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.url))
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response, "Failed to get response from local server").await);
        }
        let json: Value = response.json().await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))
    }
}

pub fn openai_chat_body(
    model: &str,
    message: &str,
    history: &[ChatMessage],
    context: &str,
    temperature: f32,
    max_tokens: u32,
) -> Value {
    let mut messages = vec![
        json!({ "role": "system", "content": DEFAULT_SYSTEM_PROMPT }),
        json!({ "role": "user", "content": context }),
    ];
    messages.extend(history.iter().map(|m| {
        let role = match m.role {
            Role::Assistant => "assistant",
            Role::User => "user",
        };
        json!({ "role": role, "content": m.text })
    }));
    messages.push(json!({ "role": "user", "content": message }));
    json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
        "max_tokens": max_tokens,
    })
}

#[async_trait]
impl ChatClient for LocalClient {
    fn name(&self) -> &str {
        "local"
    }

    async fn chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        context: &str,
    ) -> Result<String, LlmError> {
        let body = openai_chat_body(
            &self.model,
            message,
            history,
            context,
            self.temperature,
            self.max_output_tokens,
        );
        debug!(url = %self.url, model = %self.model, "sending local chat request");
        let text = self.complete(&body).await?;
        info!("local model replied with {} characters", text.len());
        Ok(text)
    }

    async fn verify(&self) -> Result<(), LlmError> {
        let response = self.http.get(format!("{}/health", self.url)).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response, "local server health check failed").await);
        }
        Ok(())
    }
}

#[async_trait]
impl OcrBackend for LocalClient {
    fn name(&self) -> &str {
        "local-vision"
    }

    async fn recognize(&self, image: &ImageData) -> Result<String, OcrError> {
        let data_url = format!(
            "data:{};base64,{}",
            image.mime_type,
            general_purpose::STANDARD.encode(&image.bytes)
        );
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "temperature": 0.0,
            "max_tokens": self.max_output_tokens,
        });
        let text = self.complete(&body).await?;
        Ok(text.trim().to_string())
    }
}
