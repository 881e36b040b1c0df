//! CLI argument parsing for the sandbox manager.
//!
//! The CLI is intentionally thin: commands map one-to-one onto store
//! operations, so the same core logic stays testable without argument
//! plumbing.
use crate::seeds::{parse_selection, SeedSelection};
use clap::{Parser, Subcommand, ValueEnum};

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "boxes",
    version,
    about = "Manage sandboxed development environments",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a shell in an existing environment
    Enter(EnterArgs),
    /// Run a command in an existing environment
    Exec(ExecArgs),
    /// Show existing environments
    List(ListArgs),
    /// Create a new environment
    New(NewArgs),
    /// Delete an environment and its work directory
    Purge(PurgeArgs),
    /// Recreate an environment (keeping its work directory)
    Reset(ResetArgs),
    /// Create and enter a new temporary environment
    Tmp(TmpArgs),
}

#[derive(Parser, Debug)]
pub struct EnterArgs {
    /// Environment name
    pub name: String,
}

#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Environment name
    pub name: String,

    /// Command to run
    pub command: String,

    /// Arguments to command (use "--" before command to disambiguate)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Set output format
    #[arg(long, value_enum, default_value_t = ListFormat::Default)]
    pub format: ListFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Default,
    Json,
    Names,
}

#[derive(Parser, Debug)]
pub struct NewArgs {
    /// Run a shell in the new environment
    #[arg(long)]
    pub enter: bool,

    /// Set(s) of files to inject into the home directory, comma-separated
    #[arg(long, value_parser = parse_selection, default_value = "default", value_name = "LIST")]
    pub seeds: SeedSelection,

    /// Environment name
    pub name: String,
}

#[derive(Parser, Debug)]
pub struct PurgeArgs {
    /// Environment name(s)
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Remove the home directory and do not recreate it
    #[arg(long)]
    pub clean: bool,

    /// Set(s) of files to inject into the home directory, comma-separated
    #[arg(long, value_parser = parse_selection, default_value = "default", value_name = "LIST")]
    pub seeds: SeedSelection,

    /// Environment name(s)
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct TmpArgs {
    /// Set(s) of files to inject into the home directory, comma-separated
    #[arg(long, value_parser = parse_selection, default_value = "default", value_name = "LIST")]
    pub seeds: SeedSelection,
}
