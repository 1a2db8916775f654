use anyhow::Result;
use std::path::PathBuf;

use crate::util::{open_pool, parse_snapshot_id, parse_volume_id};

pub fn exec_create(path: PathBuf, volume: String) -> Result<()> {
    let pool = open_pool(&path)?;
    let id = parse_volume_id(&volume)?;
    let s = pool.create_snapshot(&id)?;
    println!(
        "snapshot: id={} volume={} parent={} location={}",
        s.snapshot_id().map(|s| s.to_string()).unwrap_or_default(),
        s.id(),
        s.parent_snapshot()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string()),
        s.location().display()
    );
    Ok(())
}

pub fn exec_delete(path: PathBuf, snapshot: String) -> Result<()> {
    let pool = open_pool(&path)?;
    let sid = parse_snapshot_id(&snapshot)?;
    pool.delete_snapshot(&sid)?;
    println!("deleted snapshot {}", sid);
    Ok(())
}

pub fn exec_chain(path: PathBuf, snapshot: String) -> Result<()> {
    let pool = open_pool(&path)?;
    let sid = parse_snapshot_id(&snapshot)?;
    let chain = pool.chain(&sid)?;
    if chain.is_empty() {
        println!("(snapshot {} is not resident)", sid);
    }
    for id in chain {
        println!("{id}");
    }
    Ok(())
}
