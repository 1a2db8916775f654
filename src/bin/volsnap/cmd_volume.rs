use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;

use crate::util::{open_pool, parse_volume_id};

pub fn exec_new(path: PathBuf) -> Result<()> {
    let pool = open_pool(&path)?;
    let v = pool.new_volume()?;
    println!("volume: id={} location={}", v.id(), v.location().display());
    Ok(())
}

pub fn exec_destroy(path: PathBuf, volume: String) -> Result<()> {
    let pool = open_pool(&path)?;
    let id = parse_volume_id(&volume)?;
    pool.destroy_volume(&id)?;
    println!("destroyed volume {}", id);
    Ok(())
}

pub fn exec_list(path: PathBuf, json: bool) -> Result<()> {
    let pool = open_pool(&path)?;
    let volumes = pool.volumes()?;
    if json {
        let arr: Vec<_> = volumes
            .iter()
            .map(|v| {
                json!({
                    "id": v.id(),
                    "snapshot_id": v.snapshot_id(),
                    "parent_snapshot": v.parent_snapshot(),
                    "created_unix_ms": v.created_unix_ms(),
                    "dataset": v.dataset(),
                    "location": v.location().display().to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&arr)?);
        return Ok(());
    }
    if volumes.is_empty() {
        println!("(no volumes)");
        return Ok(());
    }
    for v in volumes {
        match v.snapshot_id() {
            Some(sid) => println!(
                "snapshot {} volume={} parent={} location={}",
                sid,
                v.id(),
                v.parent_snapshot()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                v.location().display()
            ),
            None => println!("volume   {} location={}", v.id(), v.location().display()),
        }
    }
    Ok(())
}
