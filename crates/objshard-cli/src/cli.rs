use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "objshard",
    about = "Spread objects over sharded storage backends and list them as one",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file describing the sharded store
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend kind (mem, file); overrides the config file
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Endpoint template with one %d shard index; overrides the config file
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Number of shards; overrides the config file
    #[arg(long, global = true)]
    pub shards: Option<usize>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show which shard owns each key
    Route(RouteArgs),
    /// List objects across all shards in key order
    Ls(LsArgs),
    /// Upload a file (or stdin with -) under a key
    Put(PutArgs),
    /// Write an object to stdout
    Get(GetArgs),
    /// Show object metadata
    Head(KeyArgs),
    /// Delete an object
    Rm(KeyArgs),
    /// Describe the store and its limits
    Info,
    /// Create the backing location of every shard
    Init,
}

#[derive(Args)]
pub struct RouteArgs {
    #[arg(required = true)]
    pub keys: Vec<String>,
}

#[derive(Args)]
pub struct LsArgs {
    #[arg(short, long, default_value = "")]
    pub prefix: String,
    /// Start after this key
    #[arg(short, long, default_value = "")]
    pub marker: String,
    #[arg(long)]
    pub follow_links: bool,
    /// Stop after this many objects
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct PutArgs {
    pub key: String,
    /// Source file, or - for stdin
    pub source: String,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,
    #[arg(long, default_value = "0")]
    pub offset: u64,
    /// Number of bytes to read; everything by default
    #[arg(long)]
    pub limit: Option<u64>,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}
