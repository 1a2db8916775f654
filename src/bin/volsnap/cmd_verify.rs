use anyhow::{anyhow, Result};
use std::path::PathBuf;

use VolSnap::{dir_contains, dir_listing};

use crate::util::{open_pool, parse_snapshot_id};

pub fn exec(path: PathBuf, snapshot: String, expect: Vec<String>) -> Result<()> {
    let pool = open_pool(&path)?;
    let sid = parse_snapshot_id(&snapshot)?;
    let snap = pool
        .find_snapshot(&sid)?
        .ok_or_else(|| anyhow!("snapshot {} is not resident in pool {}", sid, pool.id()))?;
    if !dir_contains(snap.location(), &expect)? {
        let listing = dir_listing(snap.location())?;
        return Err(anyhow!(
            "snapshot {} lacks some of {:?}; top-level entries: {:?}",
            sid,
            expect,
            listing
        ));
    }
    println!("ok: snapshot {} contains {:?}", sid, expect);
    Ok(())
}
