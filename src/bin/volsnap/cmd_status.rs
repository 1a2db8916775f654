use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;

use VolSnap::metrics;

use crate::util::open_pool;

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let pool = open_pool(&path)?;
    let volumes = pool.volumes()?;
    let writable = volumes.iter().filter(|v| v.is_writable()).count();
    let snapshots = volumes.len() - writable;
    let lineage = pool.lineage()?;
    let ms = metrics::snapshot();

    if json {
        let v = json!({
            "pool": pool.id(),
            "root": pool.root().display().to_string(),
            "engine": pool.engine_kind().to_string(),
            "namespace": pool.namespace(),
            "created_unix_ms": pool.created_unix_ms(),
            "writable_volumes": writable,
            "snapshot_volumes": snapshots,
            "distinct_snapshots": lineage.len(),
            "config": {
                "stream_codec": pool.config().stream_codec.to_string(),
                "zstd_level": pool.config().zstd_level,
                "chunk_size": pool.config().chunk_size,
                "index_fsync": pool.config().index_fsync,
            },
            "metrics": {
                "send_full_streams": ms.send_full_streams,
                "send_incremental_streams": ms.send_incremental_streams,
                "recv_applied": ms.recv_applied,
                "recv_failed": ms.recv_failed,
            },
        });
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }

    println!("Pool:");
    println!("  id          = {}", pool.id());
    println!("  root        = {}", pool.root().display());
    println!("  engine      = {}", pool.engine_kind());
    println!("  namespace   = {}", pool.namespace());
    println!("  created_ms  = {}", pool.created_unix_ms());
    println!("Contents:");
    println!("  writable    = {}", writable);
    println!("  snapshots   = {} ({} distinct ids)", snapshots, lineage.len());
    println!("Config:");
    println!("  {}", pool.config());
    println!("Metrics (this process):");
    println!(
        "  send        = full {} / incremental {} ({:.1}% incremental)",
        ms.send_full_streams,
        ms.send_incremental_streams,
        ms.incremental_ratio() * 100.0
    );
    println!(
        "  receive     = applied {} / failed {}",
        ms.recv_applied, ms.recv_failed
    );
    Ok(())
}
