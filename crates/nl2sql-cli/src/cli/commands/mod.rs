use super::args::*;

pub mod ask;
pub mod compare;
pub mod eval;
pub mod examples;
pub mod init;
pub(crate) mod output;
pub(crate) mod pipeline_builder;
pub mod schema;
pub mod validate;

use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = nl2sql_core::config::config_path(cli.config.as_deref());
    match cli.cmd {
        Command::Ask(args) => ask::run(args, &config).await,
        Command::Validate(args) => validate::run(args, &config),
        Command::Schema(args) => schema::run(args, &config),
        Command::Compare(args) => compare::run(args, &config).await,
        Command::Eval(args) => eval::run(args, &config).await,
        Command::Examples(args) => examples::run(args, &config).await,
        Command::Init(args) => init::run(args, &config),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
