use crate::cli::args::OutputFormat;
use nl2sql_core::{ExecutionResult, PipelineResponse, ValidationResult};
use serde::Serialize;
use serde_json::Value;

const MAX_CELL_WIDTH: usize = 40;

fn cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL_WIDTH {
        let cut: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
        format!("{cut}…")
    } else {
        text
    }
}

/// Plain-text table with a header rule.
pub(crate) fn render_table(result: &ExecutionResult) -> String {
    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .map(|c| row.get(c).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &rows {
        for (w, value) in widths.iter_mut().zip(row) {
            *w = (*w).max(value.chars().count());
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(&result.columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out.push_str(&format!(
        "({} row{}{})",
        result.row_count,
        if result.row_count == 1 { "" } else { "s" },
        if result.truncated { ", truncated" } else { "" }
    ));
    out
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn print_response(resp: &PipelineResponse, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(resp);
    }

    println!("-- {} ({})", resp.question, resp.strategy);
    if let Some(sql) = &resp.sql {
        println!("{sql}");
    }
    println!();
    match (&resp.failure, &resp.execution_result) {
        (Some(failure), _) => {
            println!("FAILED [{}]: {}", failure.kind, failure.reason);
        }
        (None, Some(result)) => println!("{}", render_table(result)),
        (None, None) => println!("valid (not executed)"),
    }

    let steps: Vec<String> = resp.trace.steps().iter().map(ToString::to_string).collect();
    println!();
    println!(
        "attempts: {}  examples: {}{}  trace: {}",
        resp.generation_attempts_used,
        resp.examples_used,
        if resp.retrieval_degraded { " (retrieval degraded)" } else { "" },
        steps.join(" > ")
    );
    Ok(())
}

pub(crate) fn print_validation(
    sql: &str,
    result: &ValidationResult,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(result);
    }
    if result.valid {
        println!("valid: {sql}");
        println!(
            "tables: {}",
            result.referenced_tables.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        println!(
            "columns: {}",
            result.referenced_columns.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    } else {
        let kind = result
            .reason
            .error_kind()
            .map(|k| k.to_string())
            .unwrap_or_default();
        println!("invalid [{kind}]: {}", result.detail);
    }
    Ok(())
}
