//! SQL generation: prompt construction, inference with provider fallback, extraction.

pub mod extract;
pub mod prompt;

use crate::cache::{cache_key, CacheStats, CachedCompletion, PromptCache};
use crate::errors::{ErrorKind, PipelineError, PipelineResult, ProviderFailure};
use crate::model::{Example, Feedback, GenerationAttempt, Strategy};
use crate::providers::llm::{InferenceClient, LlmResponse};
use crate::providers::Provider;
use crate::rate_limit::{BudgetStats, RateLimiter};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything one generation call needs.
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    pub question: &'a str,
    pub examples: &'a [Example],
    pub schema_summary: &'a str,
    pub strategy: Strategy,
    /// Structured failure of the previous attempt, if any.
    pub feedback: Option<&'a Feedback>,
    pub attempt_index: u32,
}

/// Budget and cache counters, reported next to results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratorUsage {
    pub rate_limits: Vec<BudgetStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, input: GenerationInput<'_>) -> PipelineResult<GenerationAttempt>;
}

pub struct Generator {
    inference: Arc<InferenceClient>,
    limiter: Arc<RateLimiter>,
    providers: Vec<Provider>,
    cache: Option<Arc<PromptCache>>,
    max_rate_wait: Duration,
}

impl Generator {
    /// Uses every provider configured on `inference`, in slot order.
    pub fn new(inference: Arc<InferenceClient>, limiter: Arc<RateLimiter>) -> Self {
        let providers = inference.providers();
        Self {
            inference,
            limiter,
            providers,
            cache: None,
            max_rate_wait: Duration::ZERO,
        }
    }

    pub fn with_providers(mut self, providers: Vec<Provider>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_cache(mut self, cache: Arc<PromptCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// When every provider is only locally rate limited, wait up to this long for the
    /// earliest window to reopen and try the list once more.
    pub fn with_max_rate_wait(mut self, max_rate_wait: Duration) -> Self {
        self.max_rate_wait = max_rate_wait;
        self
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Rate budgets and cache counters so far.
    pub fn usage(&self) -> GeneratorUsage {
        GeneratorUsage {
            rate_limits: self.limiter.all_stats(),
            cache: self.cache.as_ref().map(|c| c.stats()),
        }
    }

    async fn complete_with_fallback(&self, prompt: &str) -> PipelineResult<(LlmResponse, Provider)> {
        let mut failures: Vec<PipelineError> = Vec::new();

        for &provider in &self.providers {
            // Budget bookkeeping finishes before the call; no lock is held while awaiting.
            if let Err(e) = self.limiter.acquire(provider) {
                debug!(provider = %provider, error = %e, "skipping rate-limited provider");
                failures.push(e);
                continue;
            }
            match self.inference.complete(prompt, provider).await {
                Ok(resp) => return Ok((resp, provider)),
                Err(e) if e.is_retryable() => {
                    warn!(provider = %provider, error = %e, "provider failed, falling back");
                    failures.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Every provider is only locally limited: wait for the one that reopens first.
        let only_rate_limited = !failures.is_empty()
            && failures.iter().all(|e| e.kind() == ErrorKind::RateLimited);
        let earliest = failures
            .iter()
            .filter_map(|e| Some((e.provider()?, e.retry_after()?)))
            .min_by_key(|(_, wait)| *wait);
        if let Some((provider, wait)) = earliest {
            if only_rate_limited && !self.max_rate_wait.is_zero() && wait <= self.max_rate_wait {
                debug!(provider = %provider, wait_ms = wait.as_millis() as u64, "all providers rate limited, waiting");
                let outcome = match self.limiter.acquire_within(provider, self.max_rate_wait).await {
                    Ok(_) => self.inference.complete(prompt, provider).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(resp) => return Ok((resp, provider)),
                    Err(e) if e.is_retryable() => {
                        if let Some(slot) = failures.iter_mut().find(|f| f.provider() == Some(provider)) {
                            *slot = e;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(PipelineError::AllProvidersExhausted {
            failures: failures
                .iter()
                .map(|e| ProviderFailure {
                    provider: e.provider().unwrap_or(Provider::Primary),
                    kind: e.kind(),
                    message: e.to_string(),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl SqlGenerator for Generator {
    async fn generate(&self, input: GenerationInput<'_>) -> PipelineResult<GenerationAttempt> {
        let prompt = prompt::build_prompt(
            input.strategy,
            input.schema_summary,
            input.examples,
            input.question,
            input.feedback,
        );
        let key = cache_key(input.strategy, &prompt);

        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            if let Ok(sql) = extract::extract_sql(&hit.text) {
                debug!(provider = %hit.provider, "prompt cache hit");
                return Ok(GenerationAttempt {
                    attempt_index: input.attempt_index,
                    prompt,
                    raw_model_output: hit.text,
                    extracted_sql: sql,
                    provider_used: hit.provider,
                    cached: true,
                });
            }
        }

        let (resp, provider) = self.complete_with_fallback(&prompt).await?;
        let sql = extract::extract_sql(&resp.text).map_err(|f| PipelineError::Extraction {
            provider,
            reason: f.reason,
            raw_output: resp.text.clone(),
        })?;

        if let Some(cache) = &self.cache {
            cache.put(
                key,
                CachedCompletion {
                    text: resp.text.clone(),
                    provider,
                },
            );
        }

        Ok(GenerationAttempt {
            attempt_index: input.attempt_index,
            prompt,
            raw_model_output: resp.text,
            extracted_sql: sql,
            provider_used: provider,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::llm::fake::FakeClient;
    use crate::providers::llm::LlmError;
    use crate::rate_limit::RateLimit;

    fn input<'a>(feedback: Option<&'a Feedback>) -> GenerationInput<'a> {
        GenerationInput {
            question: "How many orders?",
            examples: &[],
            schema_summary: "Table: orders",
            strategy: Strategy::SchemaFirst,
            feedback,
            attempt_index: 1,
        }
    }

    fn inference(backends: Vec<(Provider, FakeClient)>) -> Arc<InferenceClient> {
        let mut client = InferenceClient::new();
        for (p, fake) in backends {
            client = client.with_backend(p, Arc::new(fake), Duration::from_secs(5));
        }
        Arc::new(client)
    }

    #[tokio::test]
    async fn falls_back_on_quota_and_reports_provider_used() {
        let primary = FakeClient::new("a").with_failure(LlmError::QuotaExceeded {
            message: "429".into(),
            retry_after: None,
        });
        let secondary = FakeClient::new("b").with_response("SELECT COUNT(*) FROM orders;");
        let generator = Generator::new(
            inference(vec![
                (Provider::Primary, primary.clone()),
                (Provider::Secondary, secondary.clone()),
            ]),
            Arc::new(RateLimiter::unlimited()),
        );

        let attempt = generator.generate(input(None)).await.unwrap();
        assert_eq!(attempt.provider_used, Provider::Secondary);
        assert_eq!(attempt.extracted_sql, "SELECT COUNT(*) FROM orders");
        assert_eq!((primary.calls(), secondary.calls()), (1, 1));
    }

    #[tokio::test]
    async fn exhausted_when_every_provider_fails() {
        let down = FakeClient::new("a").with_failure(LlmError::unavailable("503"));
        let generator = Generator::new(
            inference(vec![
                (Provider::Primary, down.clone()),
                (Provider::Secondary, down.clone()),
            ]),
            Arc::new(RateLimiter::unlimited()),
        );
        let err = generator.generate(input(None)).await.unwrap_err();
        match err {
            PipelineError::AllProvidersExhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[1].provider, Provider::Secondary);
                assert_eq!(failures[0].kind, ErrorKind::ProviderUnavailable);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limited_provider_is_skipped_without_a_call() {
        let primary = FakeClient::new("a").with_response("SELECT 1");
        let secondary = FakeClient::new("b").with_response("SELECT 2");
        let limiter = Arc::new(RateLimiter::new([(Provider::Primary, RateLimit::per_minute(1))]));
        let generator = Generator::new(
            inference(vec![
                (Provider::Primary, primary.clone()),
                (Provider::Secondary, secondary.clone()),
            ]),
            limiter,
        );

        assert_eq!(generator.generate(input(None)).await.unwrap().extracted_sql, "SELECT 1");
        assert_eq!(generator.generate(input(None)).await.unwrap().extracted_sql, "SELECT 2");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_window_when_allowed() {
        let primary = FakeClient::new("a").with_response("SELECT 1");
        let limiter = Arc::new(RateLimiter::new([(
            Provider::Primary,
            RateLimit::per_window(1, Duration::from_secs(2)),
        )]));
        let generator = Generator::new(
            inference(vec![(Provider::Primary, primary.clone())]),
            limiter,
        )
        .with_max_rate_wait(Duration::from_secs(5));

        generator.generate(input(None)).await.unwrap();
        let started = tokio::time::Instant::now();
        generator.generate(input(None)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_provider_that_reopens_first() {
        let primary = FakeClient::new("a").with_response("SELECT 1");
        let secondary = FakeClient::new("b").with_response("SELECT 2");
        let limiter = Arc::new(RateLimiter::new([
            (Provider::Primary, RateLimit::per_window(1, Duration::from_secs(30))),
            (Provider::Secondary, RateLimit::per_window(1, Duration::from_secs(3))),
        ]));
        let generator = Generator::new(
            inference(vec![
                (Provider::Primary, primary.clone()),
                (Provider::Secondary, secondary.clone()),
            ]),
            limiter,
        )
        .with_max_rate_wait(Duration::from_secs(10));

        assert_eq!(generator.generate(input(None)).await.unwrap().extracted_sql, "SELECT 1");
        assert_eq!(generator.generate(input(None)).await.unwrap().extracted_sql, "SELECT 2");
        let third = generator.generate(input(None)).await.unwrap();
        assert_eq!(third.provider_used, Provider::Secondary);
        assert_eq!((primary.calls(), secondary.calls()), (1, 2));
    }

    #[tokio::test]
    async fn exhausted_without_waiting_when_wait_exceeds_bound() {
        let primary = FakeClient::new("a").with_response("SELECT 1");
        let limiter = Arc::new(RateLimiter::new([(Provider::Primary, RateLimit::per_minute(1))]));
        let generator = Generator::new(inference(vec![(Provider::Primary, primary.clone())]), limiter)
            .with_max_rate_wait(Duration::from_secs(5));

        generator.generate(input(None)).await.unwrap();
        let err = generator.generate(input(None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllProvidersExhausted);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_keeps_raw_output() {
        let chatty = FakeClient::new("a").with_response("Sorry, I can't help with that.");
        let generator = Generator::new(
            inference(vec![(Provider::Primary, chatty)]),
            Arc::new(RateLimiter::unlimited()),
        );
        match generator.generate(input(None)).await.unwrap_err() {
            PipelineError::Extraction {
                provider,
                raw_output,
                ..
            } => {
                assert_eq!(provider, Provider::Primary);
                assert!(raw_output.contains("can't help"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_budget_and_inference() {
        let primary = FakeClient::new("a").with_response("SELECT 1");
        let limiter = Arc::new(RateLimiter::new([(Provider::Primary, RateLimit::per_minute(1))]));
        let generator = Generator::new(
            inference(vec![(Provider::Primary, primary.clone())]),
            limiter.clone(),
        )
        .with_cache(Arc::new(PromptCache::new(Duration::from_secs(60))));

        assert!(!generator.generate(input(None)).await.unwrap().cached);
        let second = generator.generate(input(None)).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.provider_used, Provider::Primary);
        assert_eq!(primary.calls(), 1);
        assert_eq!(limiter.stats(Provider::Primary).unwrap().total_blocked, 0);

        let usage = generator.usage();
        assert_eq!(usage.rate_limits[0].total_granted, 1);
        let cache = usage.cache.unwrap();
        assert_eq!((cache.entries, cache.hits, cache.misses), (1, 1, 1));
    }

    #[tokio::test]
    async fn feedback_reaches_the_prompt() {
        let primary = FakeClient::new("a").with_response("SELECT 1");
        let generator = Generator::new(
            inference(vec![(Provider::Primary, primary.clone())]),
            Arc::new(RateLimiter::unlimited()),
        );
        let feedback = Feedback::Execution {
            sql: "SELECT boom FROM orders".into(),
            kind: ErrorKind::ExecutionError,
            error: "no such column: boom".into(),
        };
        generator.generate(input(Some(&feedback))).await.unwrap();
        assert!(primary.prompts()[0].contains("no such column: boom"));
    }
}
