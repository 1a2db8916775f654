use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// VolSnap CLI: pools, volumes, snapshots and snapshot streams.
#[derive(Parser, Debug)]
#[command(name = "volsnap", version, about = "VolSnap CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Initialize a new pool (engine from --engine or VS_ENGINE)
    Init {
        #[arg(long)]
        path: PathBuf,
        /// dir | zfs
        #[arg(long)]
        engine: Option<String>,
        /// Parent dataset for zfs pools (overrides VS_ZFS_PARENT)
        #[arg(long)]
        zfs_parent: Option<String>,
    },
    /// Pool summary, config and process metrics
    Status {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Create an empty writable volume; prints its id and location
    NewVolume {
        #[arg(long)]
        path: PathBuf,
    },
    /// Destroy a writable volume
    DestroyVolume {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        volume: String,
    },
    /// List volumes and snapshots
    List {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Freeze a writable volume into a snapshot
    Snapshot {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        volume: String,
    },
    /// Delete every resident copy of a snapshot (refused while it has children)
    DeleteSnapshot {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        snapshot: String,
    },
    /// Print the ancestry of a snapshot, most recent first
    Chain {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        snapshot: String,
    },
    /// Write a snapshot stream (full, --base, or negotiated against --haves-file)
    Send {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        snapshot: String,
        /// Explicit incremental base (must be an ancestor)
        #[arg(long, conflicts_with = "haves_file")]
        base: Option<String>,
        /// Haves message produced by `volsnap haves` on the receiver
        #[arg(long)]
        haves_file: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Read a snapshot stream and register the snapshot
    Receive {
        #[arg(long)]
        path: PathBuf,
        /// Input file (default: stdin)
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Write this pool's haves message (for negotiation on the sender)
    Haves {
        #[arg(long)]
        path: PathBuf,
        /// Only report the lineage of this local snapshot
        #[arg(long)]
        along: Option<String>,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check that a resident snapshot contains the given top-level names
    Verify {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        snapshot: String,
        /// Expected top-level entry (repeatable)
        #[arg(long = "expect", required = true)]
        expect: Vec<String>,
    },
}
