//! Language-model capability: one trait, one production binding, one client.
//!
//! * [`TextGenerator`] is the seam: `generate(prompt, system_prompt,
//!   temperature)` returning raw text. Tests script it; production wraps an
//!   `edgequake_llm` provider in [`ProviderGenerator`].
//! * [`LlmClient`] adds the policies every caller needs: a per-call
//!   deadline, bounded transport retries with exponential backoff, and
//!   [`LlmClient::generate_json`], which pulls the outermost `{…}` object out
//!   of a chatty reply.
//!
//! ## Retry Strategy
//!
//! Provider errors and timeouts are retried `max_retries` times with
//! `retry_backoff_ms * 2^(attempt-1)` between attempts: with 500 ms base and
//! 3 retries the wait sequence is 500 ms → 1 s → 2 s. Malformed JSON is *not*
//! retried here; the extractor owns that decision because it can feed the
//! problem back to the model.

use crate::config::LlmConfig;
use crate::error::{AgentError, LlmError};
use crate::prompts::JSON_ONLY_SUFFIX;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn, Span};

/// Text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt` under `system_prompt`.
    ///
    /// `max_tokens` caps the reply length when the backend supports it.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        max_tokens: Option<usize>,
    ) -> Result<String, LlmError>;
}

// ── Production binding ───────────────────────────────────────────────────

/// [`TextGenerator`] backed by an `edgequake_llm` chat provider.
pub struct ProviderGenerator {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Instantiate the named provider (e.g. `ollama`) with `model`.
    ///
    /// Credentials and endpoints come from the provider's usual environment
    /// variables (`OLLAMA_HOST`, `OPENAI_API_KEY`, …).
    pub fn from_config(config: &LlmConfig) -> Result<Self, AgentError> {
        let provider = create_provider(&config.provider, &config.model)?;
        Ok(Self::new(provider))
    }
}

/// Instantiate a named provider, mapping factory errors to [`AgentError`].
pub fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AgentError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        AgentError::InvalidConfig(format!(
            "LLM provider '{name}' (model '{model}') could not be created: {e}"
        ))
    })
}

#[async_trait]
impl TextGenerator for ProviderGenerator {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        max_tokens: Option<usize>,
    ) -> Result<String, LlmError> {
        let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(prompt)];
        let options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens,
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;
        Ok(response.content)
    }
}

// ── Client with policies ─────────────────────────────────────────────────

/// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// saturating at `u64::MAX` milliseconds.
pub fn backoff_ms(base: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base.saturating_mul(factor)
}

/// Deadline + retry + JSON wrapper around a [`TextGenerator`].
pub struct LlmClient {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
    temperature: f32,
    span: Span,
}

impl LlmClient {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &LlmConfig, span: Span) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(config.timeout_seconds),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            temperature: config.temperature,
            span,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, deadline: Duration) -> Self {
        self.timeout = deadline;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// One logical call: up to `1 + max_retries` attempts.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: Option<usize>,
    ) -> Result<String, LlmError> {
        let mut last_err = LlmError::EmptyResponse;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    parent: &self.span,
                    "LLM retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self
                .generator
                .generate(prompt, system_prompt, self.temperature, max_tokens);
            let outcome = match timeout(self.timeout, call).await {
                Ok(Ok(text)) if text.trim().is_empty() => Err(LlmError::EmptyResponse),
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    secs: self.timeout.as_secs().max(1),
                }),
            };

            match outcome {
                Ok(text) => {
                    debug!(
                        parent: &self.span,
                        "LLM replied with {} chars on attempt {}",
                        text.len(),
                        attempt + 1
                    );
                    return Ok(text);
                }
                Err(e) => {
                    warn!(parent: &self.span, "LLM attempt {} failed: {}", attempt + 1, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Ask for JSON and parse the outermost object of the reply.
    pub async fn generate_json(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: Option<usize>,
    ) -> Result<serde_json::Value, LlmError> {
        let full_prompt = format!("{prompt}{JSON_ONLY_SUFFIX}");
        let text = self.generate(&full_prompt, system_prompt, max_tokens).await?;
        parse_json_object(&text)
    }
}

/// Parse the span between the first `{` and the last `}` of `text`.
///
/// Models often wrap JSON in prose or Markdown fences; the outermost braces
/// are taken as the object.
pub fn parse_json_object(text: &str) -> Result<serde_json::Value, LlmError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(LlmError::InvalidJson {
            detail: format!("no JSON object in reply: {}", preview(text)),
        });
    };
    if end < start {
        return Err(LlmError::InvalidJson {
            detail: format!("unbalanced braces in reply: {}", preview(text)),
        });
    }
    let value: serde_json::Value =
        serde_json::from_str(&text[start..=end]).map_err(|e| LlmError::InvalidJson {
            detail: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(LlmError::InvalidJson {
            detail: "top-level value is not an object".into(),
        });
    }
    Ok(value)
}

fn preview(text: &str) -> String {
    let short: String = text.chars().take(80).collect();
    if short.len() < text.len() {
        format!("{short}…")
    } else {
        short
    }
}
