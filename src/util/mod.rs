//! util: small helpers shared across modules.
//!
//! - now_unix_ms(): current Unix time in milliseconds.
//! - generate_hex_id(): 128-bit random id as lowercase hex.
//! - hex_encode(): bytes -> lowercase hex.
//! - write_json_atomic()/read_json(): tmp+rename JSON persistence (pool index).
//! - copy_tree()/remove_tree_if_exists(): directory helpers for the directory engine.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn generate_hex_id() -> String {
    use rand::RngCore;
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex_encode(&buf)
}

pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

/// Serialize `value` as pretty JSON into `path` via `<path>.tmp` + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, fsync: bool) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .with_context(|| format!("open {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("write {}", tmp.display()))?;
        if fsync {
            f.sync_all()
                .with_context(|| format!("fsync {}", tmp.display()))?;
        }
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Read JSON from `path`; Ok(None) if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let v = serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(v))
}

/// Recursively copy `src` into `dst` (created). Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read_dir {}", src.display()))? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let ft = entry.file_type()?;
        if ft.is_dir() {
            copy_tree(&from, &to)?;
        } else if ft.is_symlink() {
            let target =
                fs::read_link(&from).with_context(|| format!("readlink {}", from.display()))?;
            make_symlink(&target, &to)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("copy {} -> {}", from.display(), to.display()))?;
        }
    }
    Ok(())
}

pub fn remove_tree_if_exists(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => {
            fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))
        }
        Ok(_) => fs::remove_file(path).with_context(|| format!("remove {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
    }
}

#[cfg(unix)]
pub fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("symlink {} -> {}", link.display(), target.display()))
}

#[cfg(not(unix))]
pub fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    anyhow::bail!(
        "symlinks are not supported on this platform: {} -> {}",
        link.display(),
        target.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encode_known() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0x7f]), "00ab7f");
    }

    #[test]
    fn now_unix_ms_monotonic_nonzero() {
        let a = now_unix_ms();
        let b = now_unix_ms();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn json_atomic_roundtrip() {
        let dir = std::env::temp_dir().join(format!("vsutil-json-{}", generate_hex_id()));
        let p = dir.join("x.json");
        let v = vec!["a".to_string(), "b".to_string()];
        write_json_atomic(&p, &v, false).unwrap();
        let got: Option<Vec<String>> = read_json(&p).unwrap();
        assert_eq!(got, Some(v));
        assert!(!p.with_extension("tmp").exists());
        let missing: Option<Vec<String>> = read_json(&dir.join("nope.json")).unwrap();
        assert!(missing.is_none());
        let _ = fs::remove_dir_all(&dir);
    }
}
