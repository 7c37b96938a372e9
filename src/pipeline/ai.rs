//! Uniform "run a structured-output prompt" interface over a pluggable
//! model backend, with per-call timeout, retry-on-transient, and a bounded
//! output-validation step baked in. Every processor that needs an AI call
//! goes through `run_structured`; none talk to a provider client directly.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use crate::recovery::{CircuitBreaker, RetryConfig};

/// A single error kind for every AI-provider failure mode, with a
/// retryable flag callers branch on instead of matching concrete variants.
#[derive(Debug, Clone)]
pub struct AiError {
    pub message: String,
    pub retryable: bool,
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AiError {}

impl AiError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<AiError> for crate::error::PipelineError {
    fn from(e: AiError) -> Self {
        crate::error::PipelineError::Ai(e)
    }
}

/// Uniform interface over pluggable model backends.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Runs one structured-output prompt, returning the raw JSON value the
    /// model produced. Callers deserialize into their own result type.
    async fn run_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: &Value,
        timeout: Duration,
    ) -> Result<Value, AiError>;
}

/// Deserializes the provider's JSON value into `T`, treating a schema
/// mismatch as a non-retryable `MalformedInput`-class failure.
pub async fn run_structured<T: DeserializeOwned>(
    provider: &dyn AiProvider,
    system_prompt: &str,
    user_prompt: &str,
    output_schema: Value,
    timeout: Duration,
) -> Result<T, AiError> {
    let value = provider
        .run_structured(system_prompt, user_prompt, &output_schema, timeout)
        .await?;
    serde_json::from_value(value)
        .map_err(|e| AiError::permanent(format!("output failed schema validation: {e}")))
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub default_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: std::env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            api_key: std::env::var("AI_API_KEY").ok(),
            api_base: std::env::var("AI_API_BASE").ok(),
            default_timeout: Duration::from_secs(30),
            retry: RetryConfig::new(2, Duration::from_millis(250), Duration::from_secs(5)),
        }
    }
}

/// Production AI provider: a chat-completions backend behind a retry loop
/// and a circuit breaker, shared across a run.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    config: AiConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl OpenAiProvider {
    pub fn new(config: AiConfig) -> Self {
        let mut openai_config = OpenAIConfig::new();
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        if let Some(base) = &config.api_base {
            openai_config = openai_config.with_api_base(base);
        }

        Self {
            client: Client::with_config(openai_config),
            breaker: Mutex::new(CircuitBreaker::new(5, Duration::from_secs(30))),
            config,
        }
    }

    async fn call_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: &Value,
        timeout: Duration,
    ) -> Result<Value, AiError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()
            .map_err(|e| AiError::permanent(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(user_prompt)
            .build()
            .map_err(|e| AiError::permanent(e.to_string()))?;

        let schema = ResponseFormatJsonSchema {
            description: None,
            name: "structured_output".to_string(),
            schema: Some(output_schema.clone()),
            strict: Some(true),
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(vec![system.into(), user.into()])
            .response_format(ResponseFormat::JsonSchema { json_schema: schema })
            .build()
            .map_err(|e| AiError::permanent(e.to_string()))?;

        let response = tokio::time::timeout(timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AiError::transient("ai provider call timed out"))?
            .map_err(|e| classify_openai_error(&e))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| AiError::permanent("ai response contained no content"))?;

        serde_json::from_str(&content)
            .map_err(|e| AiError::permanent(format!("ai response was not valid json: {e}")))
    }
}

fn classify_openai_error(err: &async_openai::error::OpenAIError) -> AiError {
    match err {
        async_openai::error::OpenAIError::Reqwest(_) => AiError::transient(err.to_string()),
        async_openai::error::OpenAIError::ApiError(api_err) => {
            let retryable = api_err
                .code
                .as_ref()
                .map(|c| c == "rate_limit_exceeded" || c == "server_error")
                .unwrap_or(false);
            AiError {
                message: err.to_string(),
                retryable,
            }
        }
        _ => AiError::permanent(err.to_string()),
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    async fn run_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: &Value,
        timeout: Duration,
    ) -> Result<Value, AiError> {
        {
            let mut breaker = self.breaker.lock().await;
            if !breaker.can_execute() {
                return Err(AiError::transient("ai provider circuit breaker open"));
            }
        }

        let retry = &self.config.retry;
        let mut delay = retry.initial_delay;
        let mut last_err = None;

        for attempt in 1..=retry.max_attempts {
            match self.call_once(system_prompt, user_prompt, output_schema, timeout).await {
                Ok(value) => {
                    self.breaker.lock().await.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    if !err.retryable || attempt == retry.max_attempts {
                        self.breaker.lock().await.record_failure();
                        last_err = Some(err);
                        break;
                    }
                    warn!(attempt, error = %err, "ai call failed, retrying");
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        Duration::from_millis(
                            (delay.as_millis() as f64 * retry.backoff_multiplier) as u64,
                        ),
                        retry.max_delay,
                    );
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AiError::permanent("ai call failed with no error recorded")))
    }
}

/// Always-failing provider; used to exercise the AI-outage degrade paths in
/// tests without standing up a real backend.
pub struct FailingAiProvider;

#[async_trait]
impl AiProvider for FailingAiProvider {
    async fn run_structured(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _output_schema: &Value,
        _timeout: Duration,
    ) -> Result<Value, AiError> {
        warn!("FailingAiProvider invoked; simulating provider outage");
        Err(AiError::transient("simulated ai provider outage"))
    }
}

/// Scripted provider returning a fixed value every call; useful for
/// deterministic activity/orchestrator tests.
pub struct StaticAiProvider {
    pub value: Value,
}

#[async_trait]
impl AiProvider for StaticAiProvider {
    async fn run_structured(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _output_schema: &Value,
        _timeout: Duration,
    ) -> Result<Value, AiError> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Sample {
        ok: bool,
    }

    #[tokio::test]
    async fn static_provider_round_trips() {
        let provider = StaticAiProvider {
            value: serde_json::json!({"ok": true}),
        };
        let result: Sample = run_structured(
            &provider,
            "system",
            "user",
            serde_json::json!({}),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(result, Sample { ok: true });
    }

    #[tokio::test]
    async fn failing_provider_is_retryable() {
        let provider = FailingAiProvider;
        let err = provider
            .run_structured("s", "u", &serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.retryable);
    }
}
