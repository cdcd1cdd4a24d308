//! Error types for the pipeline.

use crate::providers::Provider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable, serializable classification of every failure the pipeline can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SyntaxError,
    Unsafe,
    UnknownTable,
    UnknownColumn,
    ExtractionError,
    ProviderUnavailable,
    ProviderQuotaExceeded,
    ProviderTimeout,
    AllProvidersExhausted,
    RateLimited,
    EmbeddingUnavailable,
    ExecutionTimeout,
    ExecutionError,
    DeadlineExceeded,
    Configuration,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "syntax_error",
            Self::Unsafe => "unsafe",
            Self::UnknownTable => "unknown_table",
            Self::UnknownColumn => "unknown_column",
            Self::ExtractionError => "extraction_error",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderQuotaExceeded => "provider_quota_exceeded",
            Self::ProviderTimeout => "provider_timeout",
            Self::AllProvidersExhausted => "all_providers_exhausted",
            Self::RateLimited => "rate_limited",
            Self::EmbeddingUnavailable => "embedding_unavailable",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ExecutionError => "execution_error",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Configuration => "configuration",
            Self::Storage => "storage",
        }
    }

    /// Errors that the self-correction loop may recover from by generating again.
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            Self::SyntaxError
                | Self::Unsafe
                | Self::UnknownTable
                | Self::UnknownColumn
                | Self::ExtractionError
                | Self::ExecutionTimeout
                | Self::ExecutionError
        )
    }

    /// Errors that move the generator on to the next provider.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ProviderUnavailable
                | Self::ProviderQuotaExceeded
                | Self::ProviderTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider's outcome inside an [`PipelineError::AllProvidersExhausted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: Provider,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.provider, self.kind, self.message)
    }
}

fn summarize(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Pipeline errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// Table is not part of the schema catalog.
    #[error("unknown table: {table}")]
    UnknownTable { table: String },

    /// Model output did not contain a SQL-shaped statement.
    #[error("could not extract SQL from {provider} output: {reason}")]
    Extraction {
        provider: Provider,
        reason: String,
        raw_output: String,
    },

    /// Provider could not be reached or returned an unusable response.
    #[error("provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: Provider, message: String },

    /// Provider refused the request because of its own quota.
    #[error("provider {provider} quota exceeded: {message}")]
    ProviderQuotaExceeded {
        provider: Provider,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Provider did not answer within the per-call timeout.
    #[error("provider {provider} timed out after {elapsed:?}")]
    ProviderTimeout {
        provider: Provider,
        elapsed: Duration,
    },

    /// Every provider in the fallback list failed.
    #[error("all providers exhausted: {}", summarize(.failures))]
    AllProvidersExhausted { failures: Vec<ProviderFailure> },

    /// Local request budget for the provider is spent.
    #[error("rate limited on {provider}: retry after {retry_after:?}")]
    RateLimited {
        provider: Provider,
        retry_after: Duration,
    },

    /// Embedding provider failed; retrieval is degraded.
    #[error("embedding unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    /// Statement was interrupted after the execution timeout.
    #[error("execution timed out after {timeout:?}")]
    ExecutionTimeout { timeout: Duration },

    /// Database rejected the statement.
    #[error("execution error: {message}")]
    Execution { message: String },

    /// Request deadline elapsed while a step was suspended.
    #[error("request deadline of {deadline:?} exceeded during {step}")]
    DeadlineExceeded { step: String, deadline: Duration },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Example store or catalog introspection failed.
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTable { .. } => ErrorKind::UnknownTable,
            Self::Extraction { .. } => ErrorKind::ExtractionError,
            Self::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            Self::ProviderQuotaExceeded { .. } => ErrorKind::ProviderQuotaExceeded,
            Self::ProviderTimeout { .. } => ErrorKind::ProviderTimeout,
            Self::AllProvidersExhausted { .. } => ErrorKind::AllProvidersExhausted,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::EmbeddingUnavailable { .. } => ErrorKind::EmbeddingUnavailable,
            Self::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            Self::Execution { .. } => ErrorKind::ExecutionError,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Config { .. } => ErrorKind::Configuration,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Provider tag, if the error is attributable to a single provider.
    pub fn provider(&self) -> Option<Provider> {
        match self {
            Self::Extraction { provider, .. }
            | Self::ProviderUnavailable { provider, .. }
            | Self::ProviderQuotaExceeded { provider, .. }
            | Self::ProviderTimeout { provider, .. }
            | Self::RateLimited { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    /// Hint for how long to wait before the same provider may succeed.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::ProviderQuotaExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the error should move generation to the next provider.
    pub fn is_retryable(&self) -> bool {
        self.kind().triggers_fallback()
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_snake_case() {
        let s = serde_json::to_string(&ErrorKind::AllProvidersExhausted).unwrap();
        assert_eq!(s, "\"all_providers_exhausted\"");
        assert_eq!(ErrorKind::UnknownColumn.to_string(), "unknown_column");
    }

    #[test]
    fn provider_errors_are_retryable_but_validation_is_not() {
        let quota = PipelineError::ProviderQuotaExceeded {
            provider: Provider::Primary,
            message: "429".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(quota.is_retryable());
        assert_eq!(quota.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(quota.provider(), Some(Provider::Primary));

        let table = PipelineError::UnknownTable {
            table: "ghosts".into(),
        };
        assert!(!table.is_retryable());
        assert!(table.kind().is_correctable());
    }

    #[test]
    fn exhausted_message_lists_every_provider() {
        let err = PipelineError::AllProvidersExhausted {
            failures: vec![
                ProviderFailure {
                    provider: Provider::Primary,
                    kind: ErrorKind::RateLimited,
                    message: "budget spent".into(),
                },
                ProviderFailure {
                    provider: Provider::Secondary,
                    kind: ErrorKind::ProviderTimeout,
                    message: "30s".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("primary (rate_limited): budget spent"));
        assert!(msg.contains("secondary (provider_timeout): 30s"));
    }
}
