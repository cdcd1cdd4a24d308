use crate::errors::ErrorKind;
use crate::orchestrator::trace::WorkflowTrace;
use crate::providers::Provider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_ROWS: usize = 100;

/// Prompting strategy for generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Single pass: schema, examples and question, answer with SQL only.
    #[default]
    SchemaFirst,
    /// Tables, then joins, then filters, then the final SQL in a fenced block.
    ChainOfThought,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::SchemaFirst, Strategy::ChainOfThought];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaFirst => "schema_first",
            Self::ChainOfThought => "chain_of_thought",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "1" | "schema_first" | "schema" => Ok(Self::SchemaFirst),
            "2" | "chain_of_thought" | "cot" => Ok(Self::ChainOfThought),
            other => Err(format!(
                "unknown strategy '{other}' (expected schema-first or chain-of-thought)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_execute")]
    pub execute: bool,
    /// Overrides the configured request deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

fn default_execute() -> bool {
    true
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            strategy: Strategy::default(),
            max_rows: DEFAULT_MAX_ROWS,
            execute: true,
            deadline: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stop after validation; nothing touches the database.
    pub fn without_execution(mut self) -> Self {
        self.execute = false;
        self
    }
}

/// Verified (question, SQL) pair used as a few-shot example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: u64,
    pub question: String,
    pub sql: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub attempt_index: u32,
    pub prompt: String,
    pub raw_model_output: String,
    pub extracted_sql: String,
    pub provider_used: Provider,
    /// Served from the prompt cache without an inference call.
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Ok,
    Unsafe,
    UnknownTable,
    UnknownColumn,
    SyntaxError,
}

impl ValidationReason {
    /// Error kind reported when a rejection ends the run.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ok => None,
            Self::Unsafe => Some(ErrorKind::Unsafe),
            Self::UnknownTable => Some(ErrorKind::UnknownTable),
            Self::UnknownColumn => Some(ErrorKind::UnknownColumn),
            Self::SyntaxError => Some(ErrorKind::SyntaxError),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: ValidationReason,
    pub detail: String,
    pub referenced_tables: BTreeSet<String>,
    /// Resolved references as `table.column`.
    pub referenced_columns: BTreeSet<String>,
}

impl ValidationResult {
    pub fn ok(referenced_tables: BTreeSet<String>, referenced_columns: BTreeSet<String>) -> Self {
        Self {
            valid: true,
            reason: ValidationReason::Ok,
            detail: "statement is a read-only query over known tables and columns".into(),
            referenced_tables,
            referenced_columns,
        }
    }

    pub fn reject(reason: ValidationReason, detail: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason,
            detail: detail.into(),
            referenced_tables: BTreeSet::new(),
            referenced_columns: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub duration_ms: u64,
    /// Statement as sent to the database, including any appended row cap.
    pub executed_sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failed(executed_sql: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
            duration_ms,
            executed_sql: executed_sql.into(),
            error: Some(error.into()),
        }
    }
}

/// Structured summary of the previous failed attempt, rendered into the next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Feedback {
    Validation {
        sql: String,
        result: ValidationResult,
    },
    Execution {
        sql: String,
        kind: ErrorKind,
        error: String,
    },
    Extraction {
        raw_output: String,
        reason: String,
    },
}

impl Feedback {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { result, .. } => result
                .reason
                .error_kind()
                .unwrap_or(ErrorKind::SyntaxError),
            Self::Execution { kind, .. } => *kind,
            Self::Extraction { .. } => ErrorKind::ExtractionError,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Validation { result, .. } => &result.detail,
            Self::Execution { error, .. } => error,
            Self::Extraction { reason, .. } => reason,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Validation { sql, .. } | Self::Execution { sql, .. } => Some(sql),
            Self::Extraction { .. } => None,
        }
    }

    /// Corrective prompt section. Deterministic for a given failure.
    pub fn render(&self) -> String {
        let mut out = String::from("## Previous attempt failed\n");
        match self {
            Self::Validation { sql, result } => {
                out.push_str(&format!(
                    "The query was rejected before execution ({}): {}\n",
                    self.kind(),
                    result.detail
                ));
                out.push_str(&format!("Rejected SQL:\n```sql\n{}\n```\n", sql));
            }
            Self::Execution { sql, error, .. } => {
                out.push_str(&format!(
                    "The query failed when run against the database ({}): {}\n",
                    self.kind(),
                    error
                ));
                out.push_str(&format!("Failing SQL:\n```sql\n{}\n```\n", sql));
            }
            Self::Extraction { raw_output, reason } => {
                out.push_str(&format!("No SQL statement could be read from the answer: {}\n", reason));
                out.push_str(&format!("Previous answer:\n{}\n", raw_output.trim()));
            }
        }
        out.push_str(
            "Write a corrected query that fixes this problem. Use only tables and columns listed in the schema.\n",
        );
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Done,
    Failed,
}

/// User-visible failure: kind, reason and the failing SQL when there was one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub kind: ErrorKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub request_id: String,
    pub question: String,
    pub strategy: Strategy,
    pub status: RunStatus,
    /// Last generated SQL.
    pub sql: Option<String>,
    pub valid: bool,
    pub validation: Option<ValidationResult>,
    pub execution_result: Option<ExecutionResult>,
    pub attempts: Vec<GenerationAttempt>,
    pub generation_attempts_used: u32,
    pub examples_used: usize,
    pub retrieval_degraded: bool,
    pub trace: WorkflowTrace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PipelineFailure>,
}

impl PipelineResponse {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }
}
