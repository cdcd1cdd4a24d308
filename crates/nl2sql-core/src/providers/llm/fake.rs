use super::{LlmClient, LlmError, LlmResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Deterministic backend for tests and offline runs.
///
/// Scripted outcomes are consumed in order; once the script is empty every call gets the
/// fixed response (or the fixed failure).
#[derive(Debug, Clone)]
pub struct FakeClient {
    model: String,
    fixed_response: Option<String>,
    fixed_failure: Option<LlmError>,
    script: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl FakeClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fixed_response: None,
            fixed_failure: None,
            script: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.fixed_response = Some(response.into());
        self
    }

    pub fn with_failure(mut self, failure: LlmError) -> Self {
        self.fixed_failure = Some(failure);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then_respond(self, response: impl Into<String>) -> Self {
        self.lock_script().push_back(Ok(response.into()));
        self
    }

    pub fn then_fail(self, failure: LlmError) -> Self {
        self.lock_script().push_back(Err(failure));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_outcome(&self) -> Result<String, LlmError> {
        if let Some(outcome) = self.lock_script().pop_front() {
            return outcome;
        }
        if let Some(failure) = &self.fixed_failure {
            return Err(failure.clone());
        }
        Ok(self
            .fixed_response
            .clone()
            .unwrap_or_else(|| "SELECT 1".to_string()))
    }
}

#[async_trait]
impl LlmClient for FakeClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let text = self.next_outcome()?;
        Ok(LlmResponse {
            text,
            backend: "fake".to_string(),
            model: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
