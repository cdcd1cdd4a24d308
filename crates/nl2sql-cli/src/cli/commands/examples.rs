use super::pipeline_builder::{catalog, embedder, example_store, load};
use crate::cli::args::{ExamplesArgs, ExamplesSub};
use crate::exit_codes;
use std::path::Path;

pub async fn run(args: ExamplesArgs, config: &Path) -> anyhow::Result<i32> {
    let cfg = load(config)?;
    let store = example_store(&cfg)?;

    match args.cmd {
        ExamplesSub::Seed { file } => {
            let Some(file) = file.or_else(|| cfg.examples.seed_file.clone()) else {
                anyhow::bail!("no seed file given and examples.seed_file is not configured");
            };
            let embedder = embedder(&cfg)?;
            let n = store.seed_from_json(&file, embedder.as_ref()).await?;
            println!("seeded {n} examples from {}", file.display());
        }
        ExamplesSub::Add { question, sql } => {
            // Only verified SQL goes into the store.
            let result = nl2sql_core::validate::validate(&sql, &catalog(&cfg)?);
            if !result.valid {
                eprintln!("refusing to store invalid SQL: {}", result.detail);
                return Ok(exit_codes::PIPELINE_FAILED);
            }
            let embedder = embedder(&cfg)?;
            let id = store.add(embedder.as_ref(), &question, &sql).await?;
            println!("stored example {id}");
        }
        ExamplesSub::List => {
            for ex in store.list()? {
                println!("{}\t{}\t{}", ex.id, ex.question, ex.sql);
            }
        }
    }
    Ok(exit_codes::SUCCESS)
}
