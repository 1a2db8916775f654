// tests/stream_roundtrip.rs
//
// Run:
//   cargo test --test stream_roundtrip -- --nocapture
//
// Scenario:
// 1) Pool A: new volume, write "alpha", snapshot S1.
// 2) Full send of S1 -> receive into A itself and into a fresh pool B.
// 3) Write "beta", snapshot S2, incremental S1 -> S2 into B.
// Checks: listings, lineage on B, stats, zstd framing.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use VolSnap::{dir_contains, dir_listing, Pool, StreamCodec, StreamMode, VolConfig};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("vstest-roundtrip-{prefix}-{pid}-{t}-{id}"))
}

fn cfg() -> VolConfig {
    VolConfig::default().with_index_fsync(false)
}

#[test]
fn full_stream_roundtrip_same_and_other_pool() -> Result<()> {
    let ra = unique_root("a");
    let rb = unique_root("b");
    let a = Pool::create(&ra, cfg())?;
    let b = Pool::create(&rb, cfg())?;

    let vol = a.new_volume()?;
    fs::write(vol.location().join("alpha"), b"first file")?;
    let s1 = a.create_snapshot(vol.id())?;
    let sid = s1.snapshot_id().cloned().unwrap();
    assert!(s1.parent_snapshot().is_none());

    let mut stream = Vec::new();
    let stats = a.send_snapshot(&s1, None, &mut stream)?;
    assert_eq!(stats.mode, StreamMode::Full);
    assert_eq!(stats.total_bytes, stream.len() as u64);

    // Same pool: a second resident copy.
    let back = a.receive_snapshot(&mut stream.as_slice())?;
    assert_eq!(back.snapshot_id(), Some(&sid));
    assert_ne!(back.id(), s1.id());
    assert_eq!(dir_listing(back.location())?, vec!["alpha"]);

    // Other pool.
    let got = b.receive_snapshot(&mut stream.as_slice())?;
    assert_eq!(got.snapshot_id(), Some(&sid));
    assert_eq!(got.pool_id(), b.id());
    assert!(dir_contains(got.location(), &["alpha"])?);
    assert_eq!(fs::read(got.location().join("alpha"))?, b"first file");
    assert_eq!(got.created_unix_ms(), s1.created_unix_ms());
    assert!(b.contains_snapshot(&sid)?);

    a.destroy()?;
    b.destroy()?;
    Ok(())
}

#[test]
fn incremental_stream_applies_on_top_of_base() -> Result<()> {
    let ra = unique_root("inc-a");
    let rb = unique_root("inc-b");
    let a = Pool::create(&ra, cfg())?;
    let b = Pool::create(&rb, cfg())?;

    let vol = a.new_volume()?;
    fs::write(vol.location().join("alpha"), b"alpha v1")?;
    fs::write(vol.location().join("scratch"), b"to be removed")?;
    let s1 = a.create_snapshot(vol.id())?;

    let mut full = Vec::new();
    a.send_snapshot(&s1, None, &mut full)?;
    b.receive_snapshot(&mut full.as_slice())?;

    fs::create_dir_all(vol.location().join("beta"))?;
    fs::write(vol.location().join("beta").join("inner"), b"nested")?;
    fs::remove_file(vol.location().join("scratch"))?;
    let s2 = a.create_snapshot(vol.id())?;
    let sid1 = s1.snapshot_id().cloned().unwrap();
    let sid2 = s2.snapshot_id().cloned().unwrap();
    assert_eq!(s2.parent_snapshot(), Some(&sid1));
    assert!(a.is_ancestor(&sid1, &sid2)?);

    let mut inc = Vec::new();
    let stats = a.send_snapshot(&s2, Some(&s1), &mut inc)?;
    assert_eq!(stats.mode, StreamMode::Incremental);
    assert_eq!(stats.base.as_ref(), Some(&sid1));

    let got = b.receive_snapshot(&mut inc.as_slice())?;
    assert_eq!(got.snapshot_id(), Some(&sid2));
    assert_eq!(got.parent_snapshot(), Some(&sid1));
    assert_eq!(dir_listing(got.location())?, vec!["alpha", "beta"]);
    assert_eq!(fs::read(got.location().join("beta").join("inner"))?, b"nested");
    assert_eq!(b.chain(&sid2)?, vec![sid2.clone(), sid1.clone()]);

    // The base copy on B is untouched.
    let base_on_b = b.find_snapshot(&sid1)?.unwrap();
    assert_eq!(dir_listing(base_on_b.location())?, vec!["alpha", "scratch"]);

    a.destroy()?;
    b.destroy()?;
    Ok(())
}

#[test]
fn zstd_framed_stream_roundtrip() -> Result<()> {
    let ra = unique_root("zstd-a");
    let rb = unique_root("zstd-b");
    let a = Pool::create(
        &ra,
        cfg().with_stream_codec(StreamCodec::Zstd).with_chunk_size(4096),
    )?;
    let b = Pool::create(&rb, cfg())?;

    let vol = a.new_volume()?;
    // Compressible and spanning many chunks.
    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 7) as u8).collect();
    fs::write(vol.location().join("alpha"), &body)?;
    let s1 = a.create_snapshot(vol.id())?;

    let mut stream = Vec::new();
    let stats = a.send_snapshot(&s1, None, &mut stream)?;
    assert!(stats.total_bytes < stats.payload_bytes);

    // The receiver decodes per the header, whatever its own codec setting.
    let got = b.receive_snapshot(&mut stream.as_slice())?;
    assert_eq!(fs::read(got.location().join("alpha"))?, body);

    a.destroy()?;
    b.destroy()?;
    Ok(())
}
