use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "arkiv",
    about = "Arkiv — content-addressable storage offer toolbox",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (TOML); built-in defaults when absent
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tenant the operation runs for
    #[arg(short, long, global = true, default_value = "0")]
    pub tenant: u32,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store one object from a file
    Put(PutArgs),
    /// Store several objects from one multiplexed batch
    BulkPut(BulkPutArgs),
    /// Read an object back
    Get(GetArgs),
    /// Print an object's digest
    Digest(DigestArgs),
    /// Delete an object, if its category allows it
    Delete(DeleteArgs),
    /// Page through a container's offer log
    Listing(ListingArgs),
    /// Container usage and disk capacity
    Capacity(CapacityArgs),
    /// Walk a container and re-verify every stored digest
    Audit(AuditArgs),
    /// Replay the offer log into local document/lifecycle stores
    Rebuild(RebuildArgs),
}

#[derive(Args)]
pub struct PutArgs {
    /// Data category (object, unit, objectgroup, backup, ...)
    pub category: String,
    pub object_id: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct BulkPutArgs {
    pub category: String,
    /// Object id per file, same order as the files
    #[arg(short = 'i', long = "id", required = true)]
    pub object_ids: Vec<String>,
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args)]
pub struct GetArgs {
    pub category: String,
    pub object_id: String,
    /// Destination file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct DigestArgs {
    pub category: String,
    pub object_id: String,
    /// Re-hash the stored bytes instead of trusting the cached digest
    #[arg(long)]
    pub recompute: bool,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub category: String,
    pub object_id: String,
}

#[derive(Args)]
pub struct ListingArgs {
    pub category: String,
    #[arg(short, long, default_value = "0")]
    pub offset: u64,
    #[arg(short, long, default_value = "100")]
    pub limit: usize,
    /// List strictly below the offset, newest first
    #[arg(long)]
    pub desc: bool,
}

#[derive(Args)]
pub struct CapacityArgs {
    pub category: String,
}

#[derive(Args)]
pub struct AuditArgs {
    pub category: String,
}

#[derive(Args)]
pub struct RebuildArgs {
    /// Collection to rebuild (unit, objectgroup, unitgraph, objectgroupgraph)
    pub collection: String,
    #[arg(short, long, default_value = "1000")]
    pub limit: usize,
}
