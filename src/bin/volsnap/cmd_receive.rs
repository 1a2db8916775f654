use anyhow::Result;
use std::path::PathBuf;

use crate::util::{open_input, open_pool};

pub fn exec(path: PathBuf, from: Option<PathBuf>) -> Result<()> {
    let pool = open_pool(&path)?;
    let mut input = open_input(from.as_ref())?;
    let s = pool.receive_snapshot(&mut input)?;
    println!(
        "received: snapshot={} volume={} location={}",
        s.snapshot_id().map(|s| s.to_string()).unwrap_or_default(),
        s.id(),
        s.location().display()
    );
    Ok(())
}
