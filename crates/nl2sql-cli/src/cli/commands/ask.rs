use super::output::{print_json, print_response};
use super::pipeline_builder::{build_pipeline, load};
use crate::cli::args::{AskArgs, OutputFormat};
use crate::exit_codes;
use nl2sql_core::QueryRequest;
use std::path::Path;
use std::time::Duration;

pub async fn run(args: AskArgs, config: &Path) -> anyhow::Result<i32> {
    let cfg = load(config)?;
    let pipeline = build_pipeline(&cfg).await?;

    let mut request = QueryRequest::new(args.question)
        .with_strategy(args.strategy)
        .with_max_rows(args.max_rows.unwrap_or(cfg.pipeline.default_max_rows));
    if let Some(secs) = args.deadline_secs {
        request = request.with_deadline(Duration::from_secs(secs));
    }
    if args.no_execute {
        request = request.without_execution();
    }

    let resp = pipeline.orchestrator.run(request).await;
    if args.format == OutputFormat::Json {
        let mut body = serde_json::to_value(&resp)?;
        body["usage"] = serde_json::to_value(pipeline.generator.usage())?;
        print_json(&body)?;
    } else {
        print_response(&resp, args.format)?;
    }

    Ok(if resp.is_done() {
        exit_codes::SUCCESS
    } else {
        exit_codes::PIPELINE_FAILED
    })
}
