use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Retrieve,
    Generate,
    Validate,
    Execute,
    Done,
    Failed,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieve => "RETRIEVE",
            Self::Generate => "GENERATE",
            Self::Validate => "VALIDATE",
            Self::Execute => "EXECUTE",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    /// Step finished without its normal output (e.g. retrieval without examples).
    Degraded,
    /// Output was produced but refused (validation rejection).
    Rejected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step: Step,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Append-only record of the states one request went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowTrace {
    entries: Vec<TraceEntry>,
}

impl WorkflowTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: Step, outcome: Outcome, detail: Option<String>, elapsed: Duration) {
        self.entries.push(TraceEntry {
            step,
            timestamp: Utc::now(),
            outcome,
            detail,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn steps(&self) -> Vec<Step> {
        self.entries.iter().map(|e| e.step).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    pub fn count(&self, step: Step) -> usize {
        self.entries.iter().filter(|e| e.step == step).count()
    }

    /// Time spent in every entry for `step`.
    pub fn elapsed_ms(&self, step: Step) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.step == step)
            .map(|e| e.elapsed_ms)
            .sum()
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        self.entries.iter().map(|e| e.elapsed_ms).sum()
    }
}
