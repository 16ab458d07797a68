use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "keystone",
    about = "Keystone: inspect and edit reference-linked JSON documents",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON document to operate on
    #[arg(short, long, global = true, default_value = "keystone.json")]
    pub file: PathBuf,

    /// TOML store configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Read the value at a path, expanding references
    Get(GetArgs),
    /// Write a value at a path
    Set(SetArgs),
    /// Delete the value at a path
    Remove(RemoveArgs),
    /// Print the canonical path behind each given path
    Resolve(ResolveArgs),
    /// Print the fully resolved document
    Dump,
    /// Print the document, leaving out excluded paths
    Export(ExportArgs),
}

#[derive(Args)]
pub struct GetArgs {
    /// Path to read; the whole document when omitted
    pub path: Option<String>,
    /// Levels of references to expand
    #[arg(short, long)]
    pub depth: Option<u32>,
}

#[derive(Args)]
pub struct SetArgs {
    pub path: String,
    /// JSON value; anything that fails to parse is stored as a string
    pub value: String,
    /// Copy-on-write instead of editing in place
    #[arg(long)]
    pub immutable: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub path: String,
}

#[derive(Args)]
pub struct ResolveArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Subtree to export
    pub path: Option<String>,
    /// Paths to leave out (repeatable)
    #[arg(short = 'x', long)]
    pub exclude: Vec<String>,
}
