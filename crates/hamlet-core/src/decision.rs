//! Decision function — persona + prompt in, reply text out.
//!
//! [`Decide`] is the seam the reactor depends on. [`ChatCompletions`] talks to
//! any OpenAI-compatible endpoint; [`ProviderChain`] tries several of them in
//! priority order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::DecisionError;

/// Max chars of an error body kept for logs.
const MAX_ERROR_BODY: usize = 500;

pub trait Decide: Send + Sync {
    /// Produce a reply, or fail. Must be callable repeatedly with no session state.
    fn decide(
        &self,
        system: &str,
        prompt: &str,
    ) -> impl Future<Output = Result<String, DecisionError>> + Send;
}

impl<D: Decide> Decide for Arc<D> {
    fn decide(
        &self,
        system: &str,
        prompt: &str,
    ) -> impl Future<Output = Result<String, DecisionError>> + Send {
        (**self).decide(system, prompt)
    }
}

// ── Chat Completions ──

#[derive(Debug, Clone)]
pub struct ChatCompletions {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl ChatCompletions {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, DecisionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            // Local servers (Ollama, llama.cpp) accept any key.
            api_key: api_key.unwrap_or("ollama").to_string(),
            model: model.to_string(),
            max_tokens,
            timeout,
        })
    }

    fn request_body(&self, system: &str, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": self.max_tokens,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, DecisionError> {
        self.client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.http_error(e))
    }

    fn http_error(&self, e: reqwest::Error) -> DecisionError {
        if e.is_timeout() {
            DecisionError::Timeout(self.timeout)
        } else {
            DecisionError::Http(e)
        }
    }

    async fn read_reply(&self, response: reqwest::Response) -> Result<String, DecisionError> {
        let data: serde_json::Value = response.json().await.map_err(|e| self.http_error(e))?;
        extract_reply(&data)
    }
}

impl Decide for ChatCompletions {
    async fn decide(&self, system: &str, prompt: &str) -> Result<String, DecisionError> {
        let body = self.request_body(system, prompt);
        info!("chat_completions request: model={} url={}", self.model, self.url);

        let response = self.post(&body).await?;
        let status = response.status();
        if status.is_success() {
            return self.read_reply(response).await;
        }

        let text = response.text().await.unwrap_or_default();
        let text: String = text.chars().take(MAX_ERROR_BODY).collect();
        error!("API HTTP {}: {} | url={}", status, text, self.url);

        // Retry once on 500 errors (transient local-server issues)
        if status.as_u16() == 500 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let retry = self.post(&body).await?;
            let retry_status = retry.status();
            if retry_status.is_success() {
                return self.read_reply(retry).await;
            }
            let retry_text = retry.text().await.unwrap_or_default();
            return Err(DecisionError::Status {
                status: retry_status.as_u16(),
                body: retry_text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        Err(DecisionError::Status {
            status: status.as_u16(),
            body: text,
        })
    }
}

/// Pull the assistant text out of a Chat Completions response.
fn extract_reply(response: &serde_json::Value) -> Result<String, DecisionError> {
    let content = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"));

    match content {
        Some(serde_json::Value::String(text)) if text.trim().is_empty() => Err(DecisionError::Empty),
        Some(serde_json::Value::String(text)) => Ok(text.trim().to_string()),
        Some(serde_json::Value::Null) => Err(DecisionError::Empty),
        _ => {
            let raw: String = response.to_string().chars().take(200).collect();
            Err(DecisionError::MalformedResponse(raw))
        }
    }
}

// ── Provider fallback ──

/// Ordered providers; the first success wins.
pub struct ProviderChain<D = ChatCompletions> {
    providers: Vec<(String, D)>,
}

impl<D: Decide> ProviderChain<D> {
    pub fn new(providers: Vec<(String, D)>) -> Self {
        Self { providers }
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl ProviderChain<ChatCompletions> {
    /// The configured primary provider, then fallbacks by ascending priority.
    pub fn from_config(config: &Config) -> Result<Self, DecisionError> {
        let primary_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let mut providers = vec![(
            config.provider.clone(),
            ChatCompletions::new(
                primary_url,
                config.api_key.as_deref(),
                &config.model,
                config.max_output_tokens,
                config.decision_timeout(),
            )?,
        )];

        let mut fallbacks = config.fallback_providers.clone();
        fallbacks.sort_by_key(|p| p.priority);
        for entry in fallbacks {
            let timeout = entry
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.decision_timeout());
            let client = ChatCompletions::new(
                &entry.base_url,
                entry.api_key.as_deref(),
                &config.model,
                config.max_output_tokens,
                timeout,
            )?;
            providers.push((entry.name, client));
        }

        Ok(Self::new(providers))
    }
}

impl<D: Decide> Decide for ProviderChain<D> {
    async fn decide(&self, system: &str, prompt: &str) -> Result<String, DecisionError> {
        let mut failures: Vec<(String, DecisionError)> = Vec::new();
        for (name, provider) in &self.providers {
            match provider.decide(system, prompt).await {
                Ok(reply) => {
                    if !failures.is_empty() {
                        info!("Provider {} answered after {} failure(s)", name, failures.len());
                    }
                    return Ok(reply);
                }
                Err(e) => {
                    warn!("Provider {} failed: {}", name, e);
                    failures.push((name.clone(), e));
                }
            }
        }

        if failures.len() == 1 {
            if let Some((_, only)) = failures.pop() {
                return Err(only);
            }
        }
        Err(DecisionError::AllProvidersFailed(
            failures
                .into_iter()
                .map(|(name, e)| format!("{}: {}", name, e))
                .collect(),
        ))
    }
}
