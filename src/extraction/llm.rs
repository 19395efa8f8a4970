//! LLM capability interface
//!
//! The extraction pipeline depends on this async trait only. An
//! OpenAI-compatible chat client ships behind the `openai` feature; tests
//! use the scripted double.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MemoriaError, Result};

/// A single completion request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    /// Per-call timeout; on expiry the call fails and is not retried
    pub timeout: Duration,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.2,
            max_tokens: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Chat completion capability
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion and return the raw text
    async fn complete(&self, request: &LlmRequest) -> Result<String>;
}

/// OpenAI-compatible chat completion client
#[cfg(feature = "openai")]
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[cfg(feature = "openai")]
impl OpenAiChatClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(request.timeout, send)
            .await
            .map_err(|_| {
                MemoriaError::Llm(format!("call timed out after {:?}", request.timeout))
            })??;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoriaError::Llm(format!(
                "chat API returned {}: {}",
                status, body
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MemoriaError::Llm("malformed chat response".to_string()))
    }
}

/// Scripted LLM double for tests
///
/// Pops queued responses in order, then falls back to a repeating answer
/// when one is set; an exhausted script without a fallback fails the call.
pub struct ScriptedLlm {
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<String>>>,
    fallback: Option<String>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses.into_iter().collect()),
            fallback: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Always answer with the same text
    pub fn repeating(text: &str) -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            fallback: Some(text.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _request: &LlmRequest) -> Result<String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(next) = self.responses.lock().pop_front() {
            return next;
        }
        if let Some(fallback) = &self.fallback {
            return Ok(fallback.clone());
        }
        Err(MemoriaError::Llm("scripted responses exhausted".to_string()))
    }
}
