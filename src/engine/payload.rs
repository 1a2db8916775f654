//! engine/payload: entry stream produced and consumed by the directory engine.
//!
//! Format (LE):
//!   [magic8="VSDIRPL1"][flags u8]  (flags bit0 = incremental)
//!   entries: [kind u8][path_len u16][path utf8][mode u32][data_len u64][data]
//!   end:     [kind u8 = 0]
//!
//! Kinds: DIR (data_len=0), FILE (data = file bytes), SYMLINK (data = target), DELETE.
//! Paths are relative, '/'-separated, and never contain "..", "." or empty components.
//!
//! This is the directory engine's own wire payload; the transmission core frames it without
//! looking inside.

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Write};

use crate::consts::{
    DIR_ENTRY_DELETE, DIR_ENTRY_DIR, DIR_ENTRY_END, DIR_ENTRY_FILE, DIR_ENTRY_SYMLINK,
    DIR_PAYLOAD_FLAG_INCREMENTAL, DIR_PAYLOAD_MAGIC,
};

/// Upper bound for symlink targets carried inline.
const MAX_SYMLINK_TARGET: u64 = 64 * 1024;
const ENTRY_FIXED: usize = 1 + 2;
const ENTRY_TAIL: usize = 4 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryHeader {
    End,
    Dir { path: String, mode: u32 },
    /// File bytes (`len` of them) follow the header in the stream.
    File { path: String, mode: u32, len: u64 },
    Symlink { path: String, target: String },
    Delete { path: String },
}

impl EntryHeader {
    pub fn path(&self) -> Option<&str> {
        match self {
            EntryHeader::End => None,
            EntryHeader::Dir { path, .. }
            | EntryHeader::File { path, .. }
            | EntryHeader::Symlink { path, .. }
            | EntryHeader::Delete { path } => Some(path),
        }
    }
}

pub fn write_payload_header<W: Write + ?Sized>(w: &mut W, incremental: bool) -> Result<()> {
    w.write_all(DIR_PAYLOAD_MAGIC)?;
    let flags = if incremental {
        DIR_PAYLOAD_FLAG_INCREMENTAL
    } else {
        0
    };
    w.write_all(&[flags])?;
    Ok(())
}

/// Returns the incremental flag.
pub fn read_payload_header<R: Read + ?Sized>(r: &mut R) -> Result<bool> {
    let mut hdr = [0u8; 9];
    r.read_exact(&mut hdr).context("read payload header")?;
    if &hdr[0..8] != DIR_PAYLOAD_MAGIC {
        bail!("bad payload magic (not a directory-engine stream)");
    }
    let flags = hdr[8];
    if flags & !DIR_PAYLOAD_FLAG_INCREMENTAL != 0 {
        bail!("unknown payload flags 0x{:02x}", flags);
    }
    Ok(flags & DIR_PAYLOAD_FLAG_INCREMENTAL != 0)
}

fn write_entry_head<W: Write + ?Sized>(
    w: &mut W,
    kind: u8,
    path: &str,
    mode: u32,
    data_len: u64,
) -> Result<()> {
    validate_rel_path(path)?;
    if path.len() > u16::MAX as usize {
        bail!("path too long for payload entry: {} bytes", path.len());
    }
    let mut head = vec![0u8; ENTRY_FIXED + path.len() + ENTRY_TAIL];
    head[0] = kind;
    LittleEndian::write_u16(&mut head[1..3], path.len() as u16);
    head[3..3 + path.len()].copy_from_slice(path.as_bytes());
    let off = 3 + path.len();
    LittleEndian::write_u32(&mut head[off..off + 4], mode);
    LittleEndian::write_u64(&mut head[off + 4..off + 12], data_len);
    w.write_all(&head)?;
    Ok(())
}

pub fn write_dir<W: Write + ?Sized>(w: &mut W, path: &str, mode: u32) -> Result<()> {
    write_entry_head(w, DIR_ENTRY_DIR, path, mode, 0)
}

/// Write a FILE entry, copying exactly `len` bytes from `data`.
pub fn write_file<W: Write + ?Sized, R: Read + ?Sized>(
    w: &mut W,
    path: &str,
    mode: u32,
    len: u64,
    data: &mut R,
) -> Result<()> {
    write_entry_head(w, DIR_ENTRY_FILE, path, mode, len)?;
    let copied = std::io::copy(&mut data.take(len), w)
        .with_context(|| format!("copy file body {}", path))?;
    if copied != len {
        bail!(
            "file {} changed while streaming: expected {} bytes, got {}",
            path,
            len,
            copied
        );
    }
    Ok(())
}

pub fn write_symlink<W: Write + ?Sized>(w: &mut W, path: &str, target: &str) -> Result<()> {
    write_entry_head(w, DIR_ENTRY_SYMLINK, path, 0o777, target.len() as u64)?;
    w.write_all(target.as_bytes())?;
    Ok(())
}

pub fn write_delete<W: Write + ?Sized>(w: &mut W, path: &str) -> Result<()> {
    write_entry_head(w, DIR_ENTRY_DELETE, path, 0, 0)
}

pub fn write_end<W: Write + ?Sized>(w: &mut W) -> Result<()> {
    w.write_all(&[DIR_ENTRY_END])?;
    Ok(())
}

/// Read the next entry header. For FILE the caller must consume `len` bytes afterwards.
pub fn read_entry<R: Read + ?Sized>(r: &mut R) -> Result<EntryHeader> {
    let mut kind = [0u8; 1];
    r.read_exact(&mut kind).context("read entry kind")?;
    let kind = kind[0];
    if kind == DIR_ENTRY_END {
        return Ok(EntryHeader::End);
    }

    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf).context("read entry path length")?;
    let path_len = LittleEndian::read_u16(&len_buf) as usize;
    let mut path = vec![0u8; path_len];
    r.read_exact(&mut path).context("read entry path")?;
    let path = String::from_utf8(path).map_err(|_| anyhow!("entry path is not utf-8"))?;
    validate_rel_path(&path)?;

    let mut tail = [0u8; ENTRY_TAIL];
    r.read_exact(&mut tail).context("read entry tail")?;
    let mode = LittleEndian::read_u32(&tail[0..4]);
    let data_len = LittleEndian::read_u64(&tail[4..12]);

    match kind {
        DIR_ENTRY_DIR => Ok(EntryHeader::Dir { path, mode }),
        DIR_ENTRY_FILE => Ok(EntryHeader::File {
            path,
            mode,
            len: data_len,
        }),
        DIR_ENTRY_SYMLINK => {
            if data_len > MAX_SYMLINK_TARGET {
                bail!("symlink target too long for {}: {} bytes", path, data_len);
            }
            let mut target = vec![0u8; data_len as usize];
            r.read_exact(&mut target).context("read symlink target")?;
            let target =
                String::from_utf8(target).map_err(|_| anyhow!("symlink target is not utf-8"))?;
            Ok(EntryHeader::Symlink { path, target })
        }
        DIR_ENTRY_DELETE => Ok(EntryHeader::Delete { path }),
        other => Err(anyhow!("unknown payload entry kind {}", other)),
    }
}

/// Reject absolute paths and anything that could escape the dataset directory.
pub fn validate_rel_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        bail!("unsafe payload path {:?}", path);
    }
    for comp in path.split('/') {
        if comp.is_empty() || comp == "." || comp == ".." {
            bail!("unsafe payload path {:?}", path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn entries_decode_in_order() -> Result<()> {
        let mut buf = Vec::new();
        write_payload_header(&mut buf, true)?;
        write_delete(&mut buf, "old")?;
        write_dir(&mut buf, "d", 0o755)?;
        write_file(&mut buf, "d/f.txt", 0o644, 5, &mut Cursor::new(b"hello".to_vec()))?;
        write_symlink(&mut buf, "d/link", "f.txt")?;
        write_end(&mut buf)?;

        let mut r = Cursor::new(buf);
        assert!(read_payload_header(&mut r)?);
        assert_eq!(read_entry(&mut r)?, EntryHeader::Delete { path: "old".into() });
        assert_eq!(
            read_entry(&mut r)?,
            EntryHeader::Dir {
                path: "d".into(),
                mode: 0o755
            }
        );
        match read_entry(&mut r)? {
            EntryHeader::File { path, mode, len } => {
                assert_eq!(path, "d/f.txt");
                assert_eq!(mode, 0o644);
                let mut body = vec![0u8; len as usize];
                r.read_exact(&mut body)?;
                assert_eq!(body, b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            read_entry(&mut r)?,
            EntryHeader::Symlink {
                path: "d/link".into(),
                target: "f.txt".into()
            }
        );
        assert_eq!(read_entry(&mut r)?, EntryHeader::End);
        Ok(())
    }

    #[test]
    fn short_file_body_is_an_error() {
        let mut buf = Vec::new();
        let err = write_file(&mut buf, "f", 0o644, 10, &mut Cursor::new(b"abc".to_vec()));
        assert!(err.is_err());
    }

    #[test]
    fn unsafe_paths_rejected() {
        for p in ["", "/etc/passwd", "a/../b", "..", "a//b", "./a", "a\\b"] {
            assert!(validate_rel_path(p).is_err(), "{p:?} must be rejected");
        }
        assert!(validate_rel_path("a/b.c/d").is_ok());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut r = Cursor::new(b"NOTMAGIC\x00".to_vec());
        assert!(read_payload_header(&mut r).is_err());
    }
}
