// tests/negotiation.rs
//
// Receiver reports haves, sender picks the closest common ancestor.
// Economy: a small change on top of a large base must ship as a small incremental.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use oorandom::Rand64;

use VolSnap::{dir_listing, read_haves, write_haves, Pool, StreamMode, VolConfig};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("vstest-negotiate-{prefix}-{pid}-{t}-{id}"))
}

fn cfg() -> VolConfig {
    VolConfig::default().with_index_fsync(false)
}

fn random_bytes(rng: &mut Rand64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        out.extend_from_slice(&rng.rand_u64().to_le_bytes());
    }
    out.truncate(len);
    out
}

#[test]
fn incremental_is_much_smaller_than_full() -> Result<()> {
    let a = Pool::create(&unique_root("eco-a"), cfg())?;
    let b = Pool::create(&unique_root("eco-b"), cfg())?;
    let mut rng = Rand64::new(0xC0FFEE);

    let vol = a.new_volume()?;
    fs::write(vol.location().join("alpha"), random_bytes(&mut rng, 2 * 1024 * 1024))?;
    let s1 = a.create_snapshot(vol.id())?;
    let mut first = Vec::new();
    a.send_snapshot(&s1, None, &mut first)?;
    b.receive_snapshot(&mut first.as_slice())?;

    fs::write(vol.location().join("beta"), random_bytes(&mut rng, 4096))?;
    let s2 = a.create_snapshot(vol.id())?;
    let sid2 = s2.snapshot_id().cloned().unwrap();

    // Haves cross the wire as a message.
    let mut msg = Vec::new();
    write_haves(&mut msg, &b.report_haves()?)?;
    let haves = read_haves(&mut msg.as_slice())?;
    assert_eq!(&haves.pool, b.id());

    let mut inc = Vec::new();
    let (plan, inc_stats) = a.send_negotiated(&sid2, &haves, &mut inc)?;
    assert_eq!(plan.mode(), StreamMode::Incremental);
    assert_eq!(plan.base.as_ref(), s1.snapshot_id());

    let mut full = Vec::new();
    let full_stats = a.send_snapshot(&s2, None, &mut full)?;
    assert!(
        inc_stats.total_bytes * 10 <= full_stats.total_bytes,
        "incremental {} vs full {}",
        inc_stats.total_bytes,
        full_stats.total_bytes
    );

    let got = b.receive_snapshot(&mut inc.as_slice())?;
    assert_eq!(dir_listing(got.location())?, vec!["alpha", "beta"]);
    assert_eq!(
        fs::read(got.location().join("alpha"))?,
        fs::read(s2.location().join("alpha"))?
    );

    a.destroy()?;
    b.destroy()?;
    Ok(())
}

#[test]
fn closest_common_ancestor_is_chosen() -> Result<()> {
    let a = Pool::create(&unique_root("cca-a"), cfg())?;
    let b = Pool::create(&unique_root("cca-b"), cfg())?;
    let vol = a.new_volume()?;

    // S1 -> S2 -> S3 -> S4 on A.
    let mut snaps = Vec::new();
    for i in 0..4 {
        fs::write(vol.location().join(format!("f{i}")), format!("gen {i}"))?;
        snaps.push(a.create_snapshot(vol.id())?);
    }
    let ids: Vec<_> = snaps
        .iter()
        .map(|s| s.snapshot_id().cloned().unwrap())
        .collect();

    // B gets S1 and S2.
    let mut s = Vec::new();
    a.send_snapshot(&snaps[0], None, &mut s)?;
    b.receive_snapshot(&mut s.as_slice())?;
    s.clear();
    a.send_snapshot(&snaps[1], Some(&snaps[0]), &mut s)?;
    b.receive_snapshot(&mut s.as_slice())?;

    let haves = b.report_haves()?;
    assert_eq!(haves.len(), 2);
    let plan = a.plan_send(&ids[3], &haves)?;
    assert_eq!(plan.base.as_ref(), Some(&ids[1]));

    // Haves restricted to S1's lineage only.
    let along = b.report_haves_along(&ids[0])?;
    assert_eq!(along.snapshots, vec![ids[0].clone()]);
    let plan = a.plan_send(&ids[3], &along)?;
    assert_eq!(plan.base.as_ref(), Some(&ids[0]));

    // Nothing in common: full.
    let empty = a.plan_send(&ids[3], &VolSnap::Haves::new(b.id().clone(), vec![]))?;
    assert_eq!(empty.mode(), StreamMode::Full);

    // Having the source itself is not a base.
    let own = a.plan_send(&ids[1], &haves)?;
    assert_eq!(own.base.as_ref(), Some(&ids[0]));

    let mut out = Vec::new();
    let (plan, _) = a.send_negotiated(&ids[3], &haves, &mut out)?;
    assert!(plan.is_incremental());
    let got = b.receive_snapshot(&mut out.as_slice())?;
    assert_eq!(dir_listing(got.location())?, vec!["f0", "f1", "f2", "f3"]);
    assert_eq!(b.chain(&ids[3])?, vec![ids[3].clone(), ids[1].clone(), ids[0].clone()]);

    a.destroy()?;
    b.destroy()?;
    Ok(())
}
