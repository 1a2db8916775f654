use anyhow::{Context, Result};
use log::info;
use std::io::Write;
use std::path::PathBuf;

use VolSnap::read_haves;

use crate::util::{open_input, open_output, open_pool, parse_snapshot_id};

pub fn exec(
    path: PathBuf,
    snapshot: String,
    base: Option<String>,
    haves_file: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    let pool = open_pool(&path)?;
    let sid = parse_snapshot_id(&snapshot)?;
    let mut sink = open_output(out.as_ref())?;

    let stats = match (base, haves_file) {
        (_, Some(hf)) => {
            let mut input = open_input(Some(&hf))?;
            let haves = read_haves(&mut input)
                .with_context(|| format!("read haves from {}", hf.display()))?;
            let (plan, stats) = pool.send_negotiated(&sid, &haves, &mut sink)?;
            info!(
                "send: negotiated against pool {} ({} haves): {}",
                haves.pool,
                haves.len(),
                plan.mode()
            );
            stats
        }
        (Some(b), None) => {
            let base = parse_snapshot_id(&b)?;
            pool.send_by_id(&sid, Some(&base), &mut sink)?
        }
        (None, None) => pool.send_by_id(&sid, None, &mut sink)?,
    };
    sink.flush().context("flush stream output")?;
    eprintln!(
        "sent {} stream for {}: {} bytes",
        stats.mode, stats.source, stats.total_bytes
    );
    Ok(())
}
