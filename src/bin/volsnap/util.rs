use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use VolSnap::{Pool, SnapshotId, VolConfig, VolumeId};

pub fn open_pool(path: &Path) -> Result<Pool> {
    Pool::open(path, VolConfig::from_env())
        .with_context(|| format!("open pool at {}", path.display()))
}

pub fn parse_volume_id(s: &str) -> Result<VolumeId> {
    s.parse::<VolumeId>().map_err(|e| anyhow!(e))
}

pub fn parse_snapshot_id(s: &str) -> Result<SnapshotId> {
    s.parse::<SnapshotId>().map_err(|e| anyhow!(e))
}

/// File or stdout.
pub fn open_output(out: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    Ok(match out {
        Some(p) => {
            let f = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(p)
                .with_context(|| format!("open {}", p.display()))?;
            Box::new(BufWriter::new(f))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

/// File or stdin.
pub fn open_input(from: Option<&PathBuf>) -> Result<Box<dyn Read>> {
    Ok(match from {
        Some(p) => {
            let f = File::open(p).with_context(|| format!("open {}", p.display()))?;
            Box::new(BufReader::new(f))
        }
        None => Box::new(BufReader::new(io::stdin().lock())),
    })
}
