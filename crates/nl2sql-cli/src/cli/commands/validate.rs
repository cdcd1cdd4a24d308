use super::output::print_validation;
use super::pipeline_builder::{catalog, load};
use crate::cli::args::ValidateArgs;
use crate::exit_codes;
use std::path::Path;

pub fn run(args: ValidateArgs, config: &Path) -> anyhow::Result<i32> {
    let cfg = load(config)?;
    let catalog = catalog(&cfg)?;

    let result = nl2sql_core::validate::validate(&args.sql, &catalog);
    print_validation(&args.sql, &result, args.format)?;

    Ok(if result.valid {
        exit_codes::SUCCESS
    } else {
        exit_codes::PIPELINE_FAILED
    })
}
