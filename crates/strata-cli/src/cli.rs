use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: layered, delta-compressed directory snapshots",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with codec, lineage and scan settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Snapshot a directory into a tree stream
    Snapshot(SnapshotArgs),
    /// Print the tree held by a tree stream
    Show(ShowArgs),
    /// Compare two tree streams
    Diff(DiffArgs),
    /// Write the delta turning one tree stream into another
    Delta(DeltaArgs),
    /// Apply a delta stream to its base tree stream
    Apply(ApplyArgs),
    /// Replay tree streams as one lineage and write its delta chain
    Chain(ChainArgs),
    /// Summarize a delta chain stream
    Inspect(InspectArgs),
}

#[derive(Args)]
pub struct SnapshotArgs {
    /// Directory to snapshot
    pub dir: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
    /// Only write this subtree, e.g. /src
    #[arg(long, default_value = "/")]
    pub path: String,
    /// Levels below the path to write
    #[arg(long)]
    pub depth: Option<u32>,
}

#[derive(Args)]
pub struct ShowArgs {
    pub file: PathBuf,
    #[arg(long, default_value = "/")]
    pub path: String,
    #[arg(long)]
    pub depth: Option<u32>,
}

#[derive(Args)]
pub struct DiffArgs {
    pub old: PathBuf,
    pub new: PathBuf,
    #[arg(long, default_value = "/")]
    pub path: String,
    #[arg(long)]
    pub depth: Option<u32>,
    /// Swap old and new
    #[arg(long)]
    pub reverse: bool,
}

#[derive(Args)]
pub struct DeltaArgs {
    pub base: PathBuf,
    pub new: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long, default_value = "/")]
    pub path: String,
    #[arg(long)]
    pub depth: Option<u32>,
}

#[derive(Args)]
pub struct ApplyArgs {
    pub base: PathBuf,
    pub delta: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct ChainArgs {
    /// Tree streams, oldest first
    #[arg(required = true)]
    pub snapshots: Vec<PathBuf>,
    #[arg(short, long)]
    pub output: PathBuf,
    /// Override the configured reroot threshold
    #[arg(long)]
    pub reroot_threshold: Option<usize>,
}

#[derive(Args)]
pub struct InspectArgs {
    pub file: PathBuf,
    /// Also show the chain rerooted at its newest member
    #[arg(long)]
    pub reroot: bool,
}
