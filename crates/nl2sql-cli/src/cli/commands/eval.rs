use super::output::print_json;
use super::pipeline_builder::{build_pipeline, load};
use crate::cli::args::{EvalArgs, OutputFormat};
use crate::exit_codes;
use nl2sql_core::evaluation::{evaluate, load_cases, EvaluationReport};
use serde_json::json;
use std::path::Path;

fn print_text(report: &EvaluationReport) {
    println!("evaluated {} question(s)", report.cases);
    for s in &report.strategies {
        println!();
        println!("{}", s.strategy);
        println!(
            "  valid: {}/{} ({:.2}%)  executed: {}/{} ({:.2}%)  matched reference: {}",
            s.valid, s.total, s.validity_rate, s.executed, s.total, s.success_rate, s.matched_reference
        );
        println!(
            "  latency ms: avg {:.2}  min {}  max {}  generation avg {:.2}  attempts avg {:.2}",
            s.avg_latency_ms, s.min_latency_ms, s.max_latency_ms, s.avg_generation_ms, s.avg_attempts
        );
        for (difficulty, d) in &s.by_difficulty {
            println!(
                "  {difficulty}: {}/{} ({:.2}%)",
                d.successful, d.total, d.success_rate
            );
        }
    }
}

/// Exits 0 once every case has run; per-case failures are part of the report.
pub async fn run(args: EvalArgs, config: &Path) -> anyhow::Result<i32> {
    let cfg = load(config)?;
    let cases = load_cases(&args.file)?;
    let pipeline = build_pipeline(&cfg).await?;

    let max_rows = args.max_rows.unwrap_or(cfg.pipeline.default_max_rows);
    let report = evaluate(&pipeline.orchestrator, &cases, max_rows).await;

    if args.format == OutputFormat::Json {
        print_json(&json!({
            "report": report,
            "usage": pipeline.generator.usage(),
        }))?;
    } else {
        print_text(&report);
    }
    Ok(exit_codes::SUCCESS)
}
