use anyhow::{anyhow, Result};
use std::path::PathBuf;

use VolSnap::{EngineKind, PoolBuilder};

pub fn exec(path: PathBuf, engine: Option<String>, zfs_parent: Option<String>) -> Result<()> {
    let mut b = PoolBuilder::new();
    if let Some(e) = engine {
        let kind: EngineKind = e.parse().map_err(|e: String| anyhow!(e))?;
        b = b.engine(kind);
    }
    if zfs_parent.is_some() {
        b = b.zfs_parent(zfs_parent);
    }
    let pool = b.create(&path)?;
    println!(
        "Initialized pool id={} engine={} namespace={} at {}",
        pool.id(),
        pool.engine_kind(),
        pool.namespace(),
        path.display()
    );
    Ok(())
}
