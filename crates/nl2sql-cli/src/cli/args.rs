use clap::{Parser, Subcommand, ValueEnum};
use nl2sql_core::config::CONFIG_PATH_ENV;
use nl2sql_core::Strategy;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "nl2sql",
    version,
    about = "Answer business questions with validated, read-only SQL"
)]
pub struct Cli {
    /// Config file (default: nl2sql.yaml)
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate, validate and run SQL for a question
    Ask(AskArgs),
    /// Check a SQL statement against the database schema without running it
    Validate(ValidateArgs),
    /// Print the schema summary used in prompts
    Schema(SchemaArgs),
    /// Run both prompting strategies on the same question
    Compare(CompareArgs),
    /// Run both strategies over a JSON file of questions and summarize
    Eval(EvalArgs),
    /// Manage the verified example store
    Examples(ExamplesArgs),
    /// Write a sample config (and optionally a demo database)
    Init(InitArgs),
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct AskArgs {
    pub question: String,

    /// schema-first | chain-of-thought
    #[arg(long, default_value = "schema-first")]
    pub strategy: Strategy,

    /// Row cap (default from config)
    #[arg(long)]
    pub max_rows: Option<usize>,

    /// Stop after validation
    #[arg(long)]
    pub no_execute: bool,

    /// Request deadline in seconds (default from config)
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    pub sql: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct SchemaArgs {
    /// Only the tables relevant to this question (plus join paths)
    #[arg(long)]
    pub question: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct CompareArgs {
    pub question: String,

    #[arg(long)]
    pub max_rows: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct EvalArgs {
    /// JSON list of {question, sql?, difficulty?}
    pub file: PathBuf,

    #[arg(long)]
    pub max_rows: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ExamplesArgs {
    #[command(subcommand)]
    pub cmd: ExamplesSub,
}

#[derive(Subcommand, Debug)]
pub enum ExamplesSub {
    /// Embed and store every pair from a JSON seed file
    Seed {
        /// Seed file (default: examples.seed_file from config)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Store one verified question/SQL pair
    Add {
        #[arg(long)]
        question: String,
        #[arg(long)]
        sql: String,
    },
    /// List stored examples
    List,
}

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,

    /// Also create the demo shop database next to the config
    #[arg(long)]
    pub demo_db: bool,
}
