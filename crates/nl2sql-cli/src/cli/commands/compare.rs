use super::output::{print_json, print_response};
use super::pipeline_builder::{build_pipeline, load};
use crate::cli::args::{CompareArgs, OutputFormat};
use crate::exit_codes;
use nl2sql_core::QueryRequest;
use std::path::Path;

pub async fn run(args: CompareArgs, config: &Path) -> anyhow::Result<i32> {
    let cfg = load(config)?;
    let orchestrator = build_pipeline(&cfg).await?.orchestrator;

    let request = QueryRequest::new(args.question)
        .with_max_rows(args.max_rows.unwrap_or(cfg.pipeline.default_max_rows));
    let cmp = orchestrator.compare_strategies(request).await;

    if args.format == OutputFormat::Json {
        print_json(&cmp)?;
    } else {
        for resp in cmp.responses() {
            print_response(resp, OutputFormat::Text)?;
            println!();
        }
        println!(
            "strategies {}",
            if cmp.agree() { "agree" } else { "disagree" }
        );
    }

    Ok(if cmp.responses().iter().any(|r| r.is_done()) {
        exit_codes::SUCCESS
    } else {
        exit_codes::PIPELINE_FAILED
    })
}
