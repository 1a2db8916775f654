use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;

use VolSnap::write_haves;

use crate::util::{open_output, open_pool, parse_snapshot_id};

pub fn exec(path: PathBuf, along: Option<String>, out: Option<PathBuf>) -> Result<()> {
    let pool = open_pool(&path)?;
    let haves = match along {
        Some(s) => pool.report_haves_along(&parse_snapshot_id(&s)?)?,
        None => pool.report_haves()?,
    };
    let mut sink = open_output(out.as_ref())?;
    let n = write_haves(&mut sink, &haves)?;
    sink.flush().context("flush haves output")?;
    eprintln!("haves: pool={} snapshots={} bytes={}", haves.pool, haves.len(), n);
    Ok(())
}
