use crate::errors::{PipelineError, PipelineResult};
use crate::providers::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

pub mod fake;
pub mod openai;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    /// Backend that produced the text, e.g. "openai" or "fake".
    pub backend: String,
    pub model: String,
}

/// Failure of a single backend call, before it is attributed to a provider slot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("{message}")]
    Unavailable { message: String },

    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("request timed out: {message}")]
    Timeout { message: String },
}

impl LlmError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    fn into_pipeline(self, provider: Provider, elapsed: Duration) -> PipelineError {
        match self {
            Self::Unavailable { message } => PipelineError::ProviderUnavailable { provider, message },
            Self::QuotaExceeded {
                message,
                retry_after,
            } => PipelineError::ProviderQuotaExceeded {
                provider,
                message,
                retry_after,
            },
            Self::Timeout { .. } => PipelineError::ProviderTimeout { provider, elapsed },
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                message: err.to_string(),
            }
        } else {
            Self::Unavailable {
                message: err.to_string(),
            }
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse, LlmError>;
    fn provider_name(&self) -> &'static str;
    fn model(&self) -> &str;
}

struct Slot {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

/// Uniform `complete(prompt, provider)` over the configured backends.
///
/// No retries happen here; fallback between providers is the generator's job.
#[derive(Default)]
pub struct InferenceClient {
    slots: BTreeMap<Provider, Slot>,
}

impl InferenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(
        mut self,
        provider: Provider,
        client: Arc<dyn LlmClient>,
        timeout: Duration,
    ) -> Self {
        self.slots.insert(provider, Slot { client, timeout });
        self
    }

    /// Configured providers in fallback order.
    pub fn providers(&self) -> Vec<Provider> {
        self.slots.keys().copied().collect()
    }

    pub async fn complete(&self, prompt: &str, provider: Provider) -> PipelineResult<LlmResponse> {
        let slot = self
            .slots
            .get(&provider)
            .ok_or_else(|| PipelineError::ProviderUnavailable {
                provider,
                message: "no backend configured for this slot".into(),
            })?;

        let span = info_span!(
            "llm.complete",
            provider = provider.as_str(),
            backend = slot.client.provider_name(),
            model = slot.client.model(),
            prompt_chars = prompt.len(),
            error = tracing::field::Empty,
        );

        let started = Instant::now();
        let outcome = tokio::time::timeout(slot.timeout, slot.client.complete(prompt))
            .instrument(span.clone())
            .await;

        let result = match outcome {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(e.into_pipeline(provider, started.elapsed())),
            Err(_) => Err(PipelineError::ProviderTimeout {
                provider,
                elapsed: slot.timeout,
            }),
        };

        match &result {
            Ok(resp) => debug!(
                parent: &span,
                chars = resp.text.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "completion received"
            ),
            Err(e) => {
                span.record("error", tracing::field::display(e.kind()));
                debug!(parent: &span, error = %e, "completion failed");
            }
        }
        result
    }
}
