//! Request state machine.
//!
//! ```text
//! RETRIEVE -> GENERATE -> VALIDATE -> EXECUTE -> DONE
//!                ^           |           |
//!                +-----------+-----------+   (feedback, bounded by MAX_GENERATION_ATTEMPTS)
//! ```
//!
//! Every state entered appends exactly one entry to the request's [`WorkflowTrace`],
//! including the terminal `DONE` or `FAILED`.

pub mod trace;

use crate::errors::{ErrorKind, PipelineError};
use crate::executor::Executor;
use crate::generator::{GenerationInput, SqlGenerator};
use crate::model::{
    Example, ExecutionResult, Feedback, GenerationAttempt, PipelineFailure, PipelineResponse,
    QueryRequest, RunStatus, Strategy, ValidationResult,
};
use crate::retrieval::{Retriever, TOP_K};
use crate::schema::SchemaCatalog;
use crate::validate::validate;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use trace::{Outcome, Step, WorkflowTrace};

/// Generation attempts per request, counting the first.
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(60);

enum State {
    Retrieve,
    Generate,
    Validate(GenerationAttempt),
    Execute(String),
    Done,
    Failed(PipelineFailure),
}

/// Mutable state of one request.
struct Run<'a> {
    request: &'a QueryRequest,
    deadline: Duration,
    deadline_at: Instant,
    schema_summary: String,
    trace: WorkflowTrace,
    examples: Vec<Example>,
    degraded: bool,
    attempts: Vec<GenerationAttempt>,
    attempts_used: u32,
    feedback: Option<Feedback>,
    last_sql: Option<String>,
    validation: Option<ValidationResult>,
    execution: Option<ExecutionResult>,
}

impl Run<'_> {
    fn record(&mut self, step: Step, outcome: Outcome, detail: Option<String>, started: Instant) {
        self.trace.record(step, outcome, detail, started.elapsed());
    }

    fn deadline_failure(&self, step: Step) -> PipelineFailure {
        let err = PipelineError::DeadlineExceeded {
            step: step.to_string(),
            deadline: self.deadline,
        };
        PipelineFailure {
            kind: err.kind(),
            reason: err.to_string(),
            sql: self.last_sql.clone(),
        }
    }
}

/// Both strategies run on the same question.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyComparison {
    pub question: String,
    pub schema_first: PipelineResponse,
    pub chain_of_thought: PipelineResponse,
}

impl StrategyComparison {
    pub fn responses(&self) -> [&PipelineResponse; 2] {
        [&self.schema_first, &self.chain_of_thought]
    }

    /// Both strategies finished and returned the same rows.
    pub fn agree(&self) -> bool {
        match (
            &self.schema_first.execution_result,
            &self.chain_of_thought.execution_result,
        ) {
            (Some(a), Some(b)) => {
                self.schema_first.is_done()
                    && self.chain_of_thought.is_done()
                    && a.rows == b.rows
            }
            _ => false,
        }
    }
}

async fn within<F: Future>(deadline_at: Instant, fut: F) -> Option<F::Output> {
    tokio::time::timeout_at(deadline_at, fut).await.ok()
}

pub struct Orchestrator {
    catalog: Arc<SchemaCatalog>,
    retriever: Arc<Retriever>,
    generator: Arc<dyn SqlGenerator>,
    executor: Executor,
    deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        retriever: Arc<Retriever>,
        generator: Arc<dyn SqlGenerator>,
        executor: Executor,
    ) -> Self {
        Self {
            catalog,
            retriever,
            generator,
            executor,
            deadline: DEFAULT_REQUEST_DEADLINE,
        }
    }

    /// Deadline for requests that do not carry their own.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Runs one request to a terminal state. Never panics on pipeline errors; every
    /// failure is reported in the response.
    pub async fn run(&self, request: QueryRequest) -> PipelineResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "pipeline.run",
            request_id = %request_id,
            strategy = %request.strategy,
        );
        self.drive(request_id, &request).instrument(span).await
    }

    /// Runs the question once per strategy, concurrently.
    pub async fn compare_strategies(&self, request: QueryRequest) -> StrategyComparison {
        let (schema_first, chain_of_thought) = tokio::join!(
            self.run(request.clone().with_strategy(Strategy::SchemaFirst)),
            self.run(request.clone().with_strategy(Strategy::ChainOfThought)),
        );
        StrategyComparison {
            question: request.question,
            schema_first,
            chain_of_thought,
        }
    }

    async fn drive(&self, request_id: String, request: &QueryRequest) -> PipelineResponse {
        let started = Instant::now();
        let deadline = request.deadline.unwrap_or(self.deadline);
        let mut run = Run {
            request,
            deadline,
            deadline_at: started + deadline,
            schema_summary: self.catalog.describe_relevant(&request.question),
            trace: WorkflowTrace::new(),
            examples: Vec::new(),
            degraded: false,
            attempts: Vec::new(),
            attempts_used: 0,
            feedback: None,
            last_sql: None,
            validation: None,
            execution: None,
        };

        let mut state = State::Retrieve;
        let failure = loop {
            state = match state {
                State::Retrieve => self.retrieve(&mut run).await,
                State::Generate => self.generate(&mut run).await,
                State::Validate(attempt) => self.validate(&mut run, attempt),
                State::Execute(sql) => self.execute(&mut run, sql).await,
                State::Done => {
                    run.trace.record(Step::Done, Outcome::Ok, None, Duration::ZERO);
                    break None;
                }
                State::Failed(failure) => {
                    run.trace.record(
                        Step::Failed,
                        Outcome::Error,
                        Some(format!("{}: {}", failure.kind, failure.reason)),
                        Duration::ZERO,
                    );
                    break Some(failure);
                }
            };
        };

        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Done
        };
        info!(
            status = ?status,
            attempts = run.attempts_used,
            degraded = run.degraded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );

        PipelineResponse {
            request_id,
            question: request.question.clone(),
            strategy: request.strategy,
            status,
            sql: run.last_sql,
            valid: run.validation.as_ref().is_some_and(|v| v.valid),
            validation: run.validation,
            execution_result: run.execution,
            attempts: run.attempts,
            generation_attempts_used: run.attempts_used,
            examples_used: run.examples.len(),
            retrieval_degraded: run.degraded,
            trace: run.trace,
            failure,
        }
    }

    async fn retrieve(&self, run: &mut Run<'_>) -> State {
        let started = Instant::now();
        match within(
            run.deadline_at,
            self.retriever.retrieve(&run.request.question, TOP_K),
        )
        .await
        {
            None => {
                run.record(Step::Retrieve, Outcome::Error, Some("deadline exceeded".into()), started);
                State::Failed(run.deadline_failure(Step::Retrieve))
            }
            Some(Ok(examples)) => {
                let detail = format!("{} examples", examples.len());
                run.examples = examples;
                run.record(Step::Retrieve, Outcome::Ok, Some(detail), started);
                State::Generate
            }
            Some(Err(e)) => {
                warn!(error = %e, "retrieval degraded; continuing without examples");
                run.degraded = true;
                run.record(Step::Retrieve, Outcome::Degraded, Some(e.to_string()), started);
                State::Generate
            }
        }
    }

    async fn generate(&self, run: &mut Run<'_>) -> State {
        let started = Instant::now();
        run.attempts_used += 1;
        let input = GenerationInput {
            question: &run.request.question,
            examples: &run.examples,
            schema_summary: &run.schema_summary,
            strategy: run.request.strategy,
            feedback: run.feedback.as_ref(),
            attempt_index: run.attempts_used,
        };
        let outcome = within(run.deadline_at, self.generator.generate(input)).await;

        match outcome {
            None => {
                run.record(Step::Generate, Outcome::Error, Some("deadline exceeded".into()), started);
                State::Failed(run.deadline_failure(Step::Generate))
            }
            Some(Ok(attempt)) => {
                let detail = format!(
                    "attempt {} via {}{}",
                    attempt.attempt_index,
                    attempt.provider_used,
                    if attempt.cached { " (cached)" } else { "" }
                );
                run.record(Step::Generate, Outcome::Ok, Some(detail), started);
                run.last_sql = Some(attempt.extracted_sql.clone());
                run.attempts.push(attempt.clone());
                State::Validate(attempt)
            }
            Some(Err(e)) => {
                run.record(Step::Generate, Outcome::Error, Some(e.to_string()), started);
                if run.degraded && !e.kind().is_correctable() {
                    // Without examples and without a usable generation there is nothing left to try.
                    return State::Failed(PipelineFailure {
                        kind: ErrorKind::EmbeddingUnavailable,
                        reason: format!("retrieval was unavailable and generation failed: {e}"),
                        sql: run.last_sql.clone(),
                    });
                }
                match e {
                    PipelineError::Extraction {
                        reason, raw_output, ..
                    } => {
                        let failure = PipelineFailure {
                            kind: ErrorKind::ExtractionError,
                            reason: reason.clone(),
                            sql: None,
                        };
                        self.correct(run, Feedback::Extraction { raw_output, reason }, failure)
                    }
                    other => State::Failed(PipelineFailure {
                        kind: other.kind(),
                        reason: other.to_string(),
                        sql: run.last_sql.clone(),
                    }),
                }
            }
        }
    }

    fn validate(&self, run: &mut Run<'_>, attempt: GenerationAttempt) -> State {
        let started = Instant::now();
        let sql = attempt.extracted_sql;
        let result = validate(&sql, &self.catalog);
        run.validation = Some(result.clone());

        if result.valid {
            info!(
                tables = ?result.referenced_tables,
                columns = ?result.referenced_columns,
                "statement accepted"
            );
            run.record(Step::Validate, Outcome::Ok, None, started);
            if run.request.execute {
                State::Execute(sql)
            } else {
                State::Done
            }
        } else {
            let kind = result.reason.error_kind().unwrap_or(ErrorKind::SyntaxError);
            run.record(
                Step::Validate,
                Outcome::Rejected,
                Some(format!("{}: {}", kind, result.detail)),
                started,
            );
            let failure = PipelineFailure {
                kind,
                reason: result.detail.clone(),
                sql: Some(sql.clone()),
            };
            self.correct(run, Feedback::Validation { sql, result }, failure)
        }
    }

    async fn execute(&self, run: &mut Run<'_>, sql: String) -> State {
        let started = Instant::now();
        let max_rows = run.request.max_rows;
        match within(run.deadline_at, self.executor.execute(&sql, max_rows)).await {
            None => {
                run.record(Step::Execute, Outcome::Error, Some("deadline exceeded".into()), started);
                State::Failed(run.deadline_failure(Step::Execute))
            }
            Some(Ok(result)) if result.success => {
                let detail = format!(
                    "{} rows{}",
                    result.row_count,
                    if result.truncated { " (truncated)" } else { "" }
                );
                run.execution = Some(result);
                run.record(Step::Execute, Outcome::Ok, Some(detail), started);
                State::Done
            }
            Some(Ok(result)) => {
                let error = result.error.clone().unwrap_or_default();
                run.execution = Some(result);
                run.record(Step::Execute, Outcome::Error, Some(error.clone()), started);
                let failure = PipelineFailure {
                    kind: ErrorKind::ExecutionError,
                    reason: error.clone(),
                    sql: Some(sql.clone()),
                };
                let feedback = Feedback::Execution {
                    sql,
                    kind: ErrorKind::ExecutionError,
                    error,
                };
                self.correct(run, feedback, failure)
            }
            Some(Err(e)) => {
                run.record(Step::Execute, Outcome::Error, Some(e.to_string()), started);
                let failure = PipelineFailure {
                    kind: e.kind(),
                    reason: e.to_string(),
                    sql: Some(sql.clone()),
                };
                let feedback = Feedback::Execution {
                    sql,
                    kind: e.kind(),
                    error: e.to_string(),
                };
                self.correct(run, feedback, failure)
            }
        }
    }

    /// Back-edge to GENERATE while budget remains.
    fn correct(&self, run: &mut Run<'_>, feedback: Feedback, failure: PipelineFailure) -> State {
        if run.attempts_used >= MAX_GENERATION_ATTEMPTS {
            warn!(
                attempts = run.attempts_used,
                kind = %failure.kind,
                "retry budget exhausted"
            );
            return State::Failed(PipelineFailure {
                reason: format!(
                    "gave up after {} generation attempts: {}",
                    run.attempts_used, failure.reason
                ),
                ..failure
            });
        }
        run.feedback = Some(feedback);
        State::Generate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineResult;
    use crate::model::ValidationReason;
    use crate::providers::embedder::fake::FakeEmbedder;
    use crate::providers::Provider;
    use crate::retrieval::ExampleIndex;
    use crate::schema::tests::shop_catalog;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns scripted SQL (or errors) in order and records the feedback it was given.
    struct Scripted {
        outputs: Mutex<Vec<PipelineResult<String>>>,
        feedback: Mutex<Vec<Option<Feedback>>>,
    }

    impl Scripted {
        fn new(outputs: Vec<PipelineResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into_iter().rev().collect()),
                feedback: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SqlGenerator for Scripted {
        async fn generate(&self, input: GenerationInput<'_>) -> PipelineResult<GenerationAttempt> {
            self.feedback.lock().unwrap().push(input.feedback.cloned());
            let next = self
                .outputs
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("SELECT 1".into()))?;
            Ok(GenerationAttempt {
                attempt_index: input.attempt_index,
                prompt: String::new(),
                raw_model_output: next.clone(),
                extracted_sql: next,
                provider_used: Provider::Primary,
                cached: false,
            })
        }
    }

    fn orchestrator(generator: Arc<dyn SqlGenerator>) -> Orchestrator {
        let retriever = Retriever::new(
            Arc::new(FakeEmbedder::hashed("fake", 8)),
            Arc::new(ExampleIndex::new()),
        );
        Orchestrator::new(
            Arc::new(shop_catalog()),
            Arc::new(retriever),
            generator,
            Executor::new("/nonexistent/shop.db"),
        )
    }

    #[tokio::test]
    async fn validation_only_request_ends_after_validate() {
        let gen = Scripted::new(vec![Ok("SELECT name FROM customers".into())]);
        let resp = orchestrator(gen)
            .run(QueryRequest::new("list customers").without_execution())
            .await;
        assert!(resp.is_done());
        assert!(resp.valid);
        assert!(resp.execution_result.is_none());
        assert_eq!(
            resp.trace.steps(),
            vec![Step::Retrieve, Step::Generate, Step::Validate, Step::Done]
        );
    }

    #[tokio::test]
    async fn rejection_feeds_back_into_the_next_attempt() {
        let gen = Scripted::new(vec![
            Ok("SELECT nickname FROM customers".into()),
            Ok("SELECT name FROM customers".into()),
        ]);
        let resp = orchestrator(gen.clone())
            .run(QueryRequest::new("list customers").without_execution())
            .await;
        assert!(resp.is_done());
        assert_eq!(resp.generation_attempts_used, 2);

        let seen = gen.feedback.lock().unwrap();
        assert!(seen[0].is_none());
        let fb = seen[1].as_ref().unwrap();
        assert_eq!(fb.kind(), ErrorKind::UnknownColumn);
        assert_eq!(fb.sql(), Some("SELECT nickname FROM customers"));
    }

    #[tokio::test]
    async fn exhaustion_reports_the_last_failure() {
        let gen = Scripted::new(vec![
            Ok("DROP TABLE customers".into()),
            Ok("DROP TABLE customers".into()),
            Ok("SELECT * FROM ghosts".into()),
        ]);
        let resp = orchestrator(gen)
            .run(QueryRequest::new("remove customers").without_execution())
            .await;
        assert_eq!(resp.status, RunStatus::Failed);
        assert_eq!(resp.generation_attempts_used, MAX_GENERATION_ATTEMPTS);
        let failure = resp.failure.unwrap();
        assert_eq!(failure.kind, ErrorKind::UnknownTable);
        assert_eq!(failure.sql.as_deref(), Some("SELECT * FROM ghosts"));
        assert_eq!(
            resp.validation.unwrap().reason,
            ValidationReason::UnknownTable
        );
        assert_eq!(resp.trace.last().unwrap().step, Step::Failed);
    }

    #[tokio::test]
    async fn exhausted_providers_fail_without_retrying() {
        let gen = Scripted::new(vec![Err(PipelineError::AllProvidersExhausted {
            failures: Vec::new(),
        })]);
        let resp = orchestrator(gen)
            .run(QueryRequest::new("anything"))
            .await;
        assert_eq!(resp.status, RunStatus::Failed);
        assert_eq!(resp.generation_attempts_used, 1);
        assert_eq!(resp.failure.unwrap().kind, ErrorKind::AllProvidersExhausted);
    }

    #[tokio::test]
    async fn extraction_failures_consume_budget() {
        let bad = || {
            Err(PipelineError::Extraction {
                provider: Provider::Primary,
                reason: "no statement".into(),
                raw_output: "I cannot answer".into(),
            })
        };
        let gen = Scripted::new(vec![bad(), bad(), bad()]);
        let resp = orchestrator(gen.clone())
            .run(QueryRequest::new("anything"))
            .await;
        assert_eq!(resp.failure.unwrap().kind, ErrorKind::ExtractionError);
        assert_eq!(resp.generation_attempts_used, 3);
        assert!(matches!(
            gen.feedback.lock().unwrap()[1],
            Some(Feedback::Extraction { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_database_is_an_execution_failure() {
        let gen = Scripted::new(vec![
            Ok("SELECT name FROM customers".into()),
            Ok("SELECT name FROM customers".into()),
            Ok("SELECT name FROM customers".into()),
        ]);
        let resp = orchestrator(gen).run(QueryRequest::new("list customers")).await;
        assert_eq!(resp.status, RunStatus::Failed);
        assert_eq!(resp.failure.as_ref().unwrap().kind, ErrorKind::ExecutionError);
        assert!(!resp.execution_result.unwrap().success);
        assert_eq!(resp.trace.count(Step::Execute), 3);
    }
}
