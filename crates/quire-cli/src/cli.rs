use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use quire_index::DbPlatform;

#[derive(Parser)]
#[command(name = "quire", about = "Quire repository persistence tools", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the index schema and commit statements for a database platform
    Schema(SchemaArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
    /// Parse a resource id and show its parts
    CheckId(CheckIdArgs),
    /// List commit intents that never completed
    Intents(IntentsArgs),
}

#[derive(Args)]
pub struct SchemaArgs {
    /// Overrides the platform named by the configuration
    #[arg(long)]
    pub platform: Option<DbPlatform>,
    /// Configuration whose `[index] platform` is used
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Only print the DDL, without commit statements
    #[arg(long)]
    pub ddl_only: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckIdArgs {
    pub id: String,
}

#[derive(Args)]
pub struct IntentsArgs {
    #[arg(long)]
    pub file: PathBuf,
}
