//! Natural-language to SQL pipeline.
//!
//! A request flows through retrieval of similar verified examples, prompt construction and
//! inference, static validation against the schema catalog and finally read-only execution.
//! Failed validation or execution feeds back into generation until the retry budget is spent.

pub mod cache;
pub mod config;
pub mod errors;
pub mod evaluation;
pub mod executor;
pub mod generator;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod rate_limit;
pub mod retrieval;
pub mod schema;
pub mod validate;

pub use errors::{ErrorKind, PipelineError, PipelineResult};
pub use model::{
    ExecutionResult, Feedback, GenerationAttempt, PipelineFailure, PipelineResponse, QueryRequest,
    RunStatus, Strategy, ValidationReason, ValidationResult,
};
pub use orchestrator::{Orchestrator, StrategyComparison};
pub use providers::Provider;
pub use schema::SchemaCatalog;
