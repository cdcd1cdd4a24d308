//! Batch evaluation of both prompting strategies over a file of questions.
//!
//! Every case runs through [`Orchestrator::compare_strategies`]. When a case carries a
//! reference query, it is executed with the same row cap and its rows are compared with the
//! generated result, ignoring column names and row order.

use crate::model::{ExecutionResult, PipelineResponse, QueryRequest, Strategy};
use crate::orchestrator::trace::Step;
use crate::orchestrator::Orchestrator;
use crate::ErrorKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// One question, optionally with a known-good query and a difficulty label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalCase {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CaseFile {
    List(Vec<EvalCase>),
    Wrapped { cases: Vec<EvalCase> },
}

/// Reads a JSON list of cases, or an object with a `cases` list.
pub fn load_cases(path: &Path) -> anyhow::Result<Vec<EvalCase>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read evaluation file {}", path.display()))?;
    let file: CaseFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse evaluation file {}", path.display()))?;
    let cases = match file {
        CaseFile::List(cases) | CaseFile::Wrapped { cases } => cases,
    };
    if cases.is_empty() {
        anyhow::bail!("evaluation file {} has no cases", path.display());
    }
    Ok(cases)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseOutcome {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub strategy: Strategy,
    pub done: bool,
    pub valid: bool,
    pub executed: bool,
    pub generation_attempts: u32,
    pub generation_ms: u64,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Rows equal the reference query's rows; `None` without a usable reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches_reference: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DifficultyStats {
    pub total: usize,
    pub successful: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategySummary {
    pub strategy: Strategy,
    pub total: usize,
    pub valid: usize,
    pub executed: usize,
    pub matched_reference: usize,
    /// Percentages, rounded to two decimals.
    pub validity_rate: f64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub avg_generation_ms: f64,
    pub avg_attempts: f64,
    pub by_difficulty: BTreeMap<String, DifficultyStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub cases: usize,
    pub strategies: Vec<StrategySummary>,
    pub outcomes: Vec<CaseOutcome>,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(part as f64 * 100.0 / total as f64)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        round2(sum / n as f64)
    }
}

/// Row contents as comparable text, order-insensitive.
fn row_multiset(result: &ExecutionResult) -> Vec<String> {
    let mut rows: Vec<String> = result
        .rows
        .iter()
        .map(|row| {
            let values: Vec<&Value> = row.values().collect();
            serde_json::to_string(&values).unwrap_or_default()
        })
        .collect();
    rows.sort();
    rows
}

fn outcome(
    case: &EvalCase,
    resp: &PipelineResponse,
    reference: Option<&ExecutionResult>,
) -> CaseOutcome {
    let executed = resp
        .execution_result
        .as_ref()
        .is_some_and(|r| r.success && resp.is_done());
    let matches_reference = match (reference, &resp.execution_result) {
        (Some(expected), Some(actual)) if executed => {
            Some(row_multiset(expected) == row_multiset(actual))
        }
        (Some(_), _) => Some(false),
        (None, _) => None,
    };
    CaseOutcome {
        question: case.question.clone(),
        difficulty: case.difficulty.clone(),
        strategy: resp.strategy,
        done: resp.is_done(),
        valid: resp.valid,
        executed,
        generation_attempts: resp.generation_attempts_used,
        generation_ms: resp.trace.elapsed_ms(Step::Generate),
        latency_ms: resp.trace.total_elapsed_ms(),
        row_count: resp.execution_result.as_ref().map(|r| r.row_count),
        sql: resp.sql.clone(),
        matches_reference,
        failure: resp.failure.as_ref().map(|f| f.kind),
    }
}

fn summarize(strategy: Strategy, outcomes: &[CaseOutcome]) -> StrategySummary {
    let mine: Vec<&CaseOutcome> = outcomes.iter().filter(|o| o.strategy == strategy).collect();
    let total = mine.len();
    let valid = mine.iter().filter(|o| o.valid).count();
    let executed = mine.iter().filter(|o| o.executed).count();

    let mut by_difficulty: BTreeMap<String, DifficultyStats> = BTreeMap::new();
    for o in &mine {
        if let Some(d) = &o.difficulty {
            let stats = by_difficulty.entry(d.clone()).or_default();
            stats.total += 1;
            if o.executed {
                stats.successful += 1;
            }
        }
    }
    for stats in by_difficulty.values_mut() {
        stats.success_rate = percent(stats.successful, stats.total);
    }

    StrategySummary {
        strategy,
        total,
        valid,
        executed,
        matched_reference: mine
            .iter()
            .filter(|o| o.matches_reference == Some(true))
            .count(),
        validity_rate: percent(valid, total),
        success_rate: percent(executed, total),
        avg_latency_ms: mean(mine.iter().map(|o| o.latency_ms as f64)),
        min_latency_ms: mine.iter().map(|o| o.latency_ms).min().unwrap_or(0),
        max_latency_ms: mine.iter().map(|o| o.latency_ms).max().unwrap_or(0),
        avg_generation_ms: mean(mine.iter().map(|o| o.generation_ms as f64)),
        avg_attempts: mean(mine.iter().map(|o| o.generation_attempts as f64)),
        by_difficulty,
    }
}

/// Runs every case with both strategies, one case at a time.
pub async fn evaluate(
    orchestrator: &Orchestrator,
    cases: &[EvalCase],
    max_rows: usize,
) -> EvaluationReport {
    let mut outcomes = Vec::with_capacity(cases.len() * Strategy::ALL.len());

    for (i, case) in cases.iter().enumerate() {
        debug!(case = i + 1, total = cases.len(), question = %case.question, "evaluating");
        let comparison = orchestrator
            .compare_strategies(QueryRequest::new(case.question.clone()).with_max_rows(max_rows))
            .await;

        let reference = match &case.sql {
            Some(sql) => match orchestrator.executor().execute(sql, max_rows).await {
                Ok(result) if result.success => Some(result),
                Ok(result) => {
                    info!(question = %case.question, error = ?result.error, "reference query failed; not compared");
                    None
                }
                Err(e) => {
                    info!(question = %case.question, error = %e, "reference query failed; not compared");
                    None
                }
            },
            None => None,
        };

        for resp in comparison.responses() {
            outcomes.push(outcome(case, resp, reference.as_ref()));
        }
    }

    EvaluationReport {
        cases: cases.len(),
        strategies: Strategy::ALL
            .iter()
            .map(|s| summarize(*s, &outcomes))
            .collect(),
        outcomes,
    }
}
