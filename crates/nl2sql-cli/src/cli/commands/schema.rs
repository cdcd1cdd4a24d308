use super::pipeline_builder::{catalog, load};
use crate::cli::args::SchemaArgs;
use crate::exit_codes;
use std::path::Path;

pub fn run(args: SchemaArgs, config: &Path) -> anyhow::Result<i32> {
    let cfg = load(config)?;
    let catalog = catalog(&cfg)?;
    match args.question {
        Some(q) => println!("{}", catalog.describe_relevant(&q)),
        None => println!("{}", catalog.describe()),
    }
    Ok(exit_codes::SUCCESS)
}
