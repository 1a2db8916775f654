// tests/receive_failures.rs
//
// Receive is all-or-nothing: a rejected or broken stream leaves neither a volume,
// a lineage entry, nor an engine dataset behind.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use VolSnap::engine::payload;
use VolSnap::transmit::FrameWriter;
use VolSnap::{Pool, SnapshotId, StreamCodec, StreamHeader, VolConfig, VolError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("vstest-recvfail-{prefix}-{pid}-{t}-{id}"))
}

fn cfg() -> VolConfig {
    VolConfig::default().with_index_fsync(false)
}

/// Names of the received datasets left in a directory-engine pool.
fn leftover_receives(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for sub in ["datasets", "snapshots"] {
        for e in fs::read_dir(root.join("engine").join(sub))? {
            let name = e?.file_name().to_string_lossy().into_owned();
            if name.starts_with("recv-") || name.starts_with(".tmp-recv-") {
                out.push(name);
            }
        }
    }
    Ok(out)
}

/// Yields `data`, then fails instead of reaching EOF.
struct FailingReader<'a> {
    data: &'a [u8],
}

impl Read for FailingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"));
        }
        let n = buf.len().min(self.data.len()).min(1000);
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

/// Pool A with S1 -> S2, pool B empty. Returns the incremental and full streams of S2.
fn two_snapshots(a: &Pool) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let vol = a.new_volume()?;
    fs::write(vol.location().join("alpha"), vec![0x5Au8; 20_000])?;
    let s1 = a.create_snapshot(vol.id())?;
    fs::write(vol.location().join("beta"), vec![0xA5u8; 20_000])?;
    let s2 = a.create_snapshot(vol.id())?;

    let mut full1 = Vec::new();
    a.send_snapshot(&s1, None, &mut full1)?;
    let mut inc = Vec::new();
    a.send_snapshot(&s2, Some(&s1), &mut inc)?;
    let mut full2 = Vec::new();
    a.send_snapshot(&s2, None, &mut full2)?;
    Ok((full1, inc, full2))
}

#[test]
fn missing_base_is_rejected_without_side_effects() -> Result<()> {
    let a = Pool::create(&unique_root("mb-a"), cfg())?;
    let rb = unique_root("mb-b");
    let b = Pool::create(&rb, cfg())?;
    let (_, inc, _) = two_snapshots(&a)?;

    let err = b.receive_snapshot(&mut inc.as_slice()).unwrap_err();
    assert!(matches!(err, VolError::MissingBase { .. }), "got {err}");
    assert_eq!(err.kind(), "MissingBase");
    assert!(b.volumes()?.is_empty());
    assert!(b.lineage()?.is_empty());
    assert!(leftover_receives(&rb)?.is_empty());

    a.destroy()?;
    b.destroy()?;
    Ok(())
}

#[test]
fn truncated_stream_leaves_no_trace() -> Result<()> {
    let a = Pool::create(&unique_root("tr-a"), cfg())?;
    let rb = unique_root("tr-b");
    let b = Pool::create(&rb, cfg())?;
    let (full1, inc, _) = two_snapshots(&a)?;

    // Cut inside the payload and just before the terminator.
    for cut in [full1.len() / 2, full1.len() - 1] {
        let err = b.receive_snapshot(&mut &full1[..cut]).unwrap_err();
        assert_eq!(err.kind(), "CorruptStream", "cut at {cut}: {err}");
        assert!(b.volumes()?.is_empty());
        assert!(leftover_receives(&rb)?.is_empty());
    }

    // With the base resident, a broken incremental leaves only the base.
    b.receive_snapshot(&mut full1.as_slice())?;
    let before = b.volumes()?;
    let err = b.receive_snapshot(&mut &inc[..inc.len() - 20]).unwrap_err();
    assert_eq!(err.kind(), "CorruptStream");
    assert_eq!(b.volumes()?, before);
    assert_eq!(b.lineage()?.len(), 1);
    assert_eq!(leftover_receives(&rb)?.len(), 2); // the base copy only

    a.destroy()?;
    b.destroy()?;
    Ok(())
}

#[test]
fn failing_source_is_reported_as_io() -> Result<()> {
    let a = Pool::create(&unique_root("io-a"), cfg())?;
    let rb = unique_root("io-b");
    let b = Pool::create(&rb, cfg())?;
    let (_, _, full2) = two_snapshots(&a)?;

    let mut src = FailingReader {
        data: &full2[..full2.len() / 3],
    };
    let err = b.receive_snapshot(&mut src).unwrap_err();
    assert_eq!(err.kind(), "Io", "got {err}");
    assert!(b.volumes()?.is_empty());
    assert!(leftover_receives(&rb)?.is_empty());

    a.destroy()?;
    b.destroy()?;
    Ok(())
}

#[test]
fn corrupt_header_is_rejected() -> Result<()> {
    let a = Pool::create(&unique_root("hdr-a"), cfg())?;
    let b = Pool::create(&unique_root("hdr-b"), cfg())?;
    let (full1, _, _) = two_snapshots(&a)?;

    let mut bad_magic = full1.clone();
    bad_magic[0] ^= 0xFF;
    assert_eq!(
        b.receive_snapshot(&mut bad_magic.as_slice()).unwrap_err().kind(),
        "CorruptStream"
    );

    let mut bad_crc = full1.clone();
    bad_crc[12] ^= 0x01; // inside created_ms
    assert_eq!(
        b.receive_snapshot(&mut bad_crc.as_slice()).unwrap_err().kind(),
        "CorruptStream"
    );

    assert_eq!(
        b.receive_snapshot(&mut &b"VSNAP"[..]).unwrap_err().kind(),
        "CorruptStream"
    );
    assert!(b.volumes()?.is_empty());

    a.destroy()?;
    b.destroy()?;
    Ok(())
}

#[cfg(unix)]
#[test]
fn stream_cannot_write_outside_the_pool() -> Result<()> {
    let rb = unique_root("escape-b");
    let b = Pool::create(&rb, cfg())?;
    let outside = unique_root("escape-target");
    fs::create_dir_all(&outside)?;

    // Hand-built full stream: a symlink to `outside`, then a file "through" it.
    let mut stream = Vec::new();
    StreamHeader::new(SnapshotId::generate(), None, StreamCodec::None, 0).write_to(&mut stream)?;
    {
        let mut fw = FrameWriter::new(&mut stream, StreamCodec::None, 3, 64 * 1024);
        payload::write_payload_header(&mut fw, false)?;
        payload::write_symlink(&mut fw, "x", &outside.to_string_lossy())?;
        payload::write_file(&mut fw, "x/pwned", 0o644, 3, &mut &b"bad"[..])?;
        payload::write_end(&mut fw)?;
        fw.finish()?;
    }

    let err = b.receive_snapshot(&mut stream.as_slice()).unwrap_err();
    assert_eq!(err.kind(), "EngineInvocation", "got {err}");
    assert!(!outside.join("pwned").exists());
    assert!(b.volumes()?.is_empty());
    assert!(leftover_receives(&rb)?.is_empty());

    b.destroy()?;
    fs::remove_dir_all(&outside)?;
    Ok(())
}
