//! File-based pool locking.
//!
//! Cross-process (fs2) advisory locks on <pool_root>/LOCK:
//! - Exclusive: mutating pool operations (new volume, snapshot, delete, receive).
//! - Shared: send/negotiation and read-only queries.
//!
//! In-process serialization is done by the pool's RwLock; the file lock is always taken after
//! it, so two threads of one process never wait on each other in opposite order.
//! Lock is released on Drop.

use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::consts::LOCK_FILE;
use crate::error::{Result, VolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // unlock errors on drop are ignored; closing the fd releases the lock anyway.
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn lock_file_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

fn open_lock_file(root: &Path) -> Result<std::fs::File> {
    let path = lock_file_path(root);
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| VolError::io(format!("open lock file {}", path.display()), e))
}

/// Acquire a lock in the requested mode. Blocks until acquired.
pub fn acquire_lock(root: &Path, mode: LockMode) -> Result<LockGuard> {
    let file = open_lock_file(root)?;
    let path = lock_file_path(root);
    let res = match mode {
        LockMode::Shared => FileExt::lock_shared(&file),
        LockMode::Exclusive => FileExt::lock_exclusive(&file),
    };
    res.map_err(|e| VolError::io(format!("lock {:?} {}", mode, path.display()), e))?;
    Ok(LockGuard { file, path, mode })
}

/// Try to acquire a lock in the requested mode. Returns Err if already locked elsewhere.
pub fn try_acquire_lock(root: &Path, mode: LockMode) -> Result<LockGuard> {
    let file = open_lock_file(root)?;
    let path = lock_file_path(root);
    let res = match mode {
        LockMode::Shared => FileExt::try_lock_shared(&file),
        LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
    };
    res.map_err(|e| VolError::io(format!("try lock {:?} {}", mode, path.display()), e))?;
    Ok(LockGuard { file, path, mode })
}

pub fn acquire_exclusive_lock(root: &Path) -> Result<LockGuard> {
    acquire_lock(root, LockMode::Exclusive)
}

pub fn acquire_shared_lock(root: &Path) -> Result<LockGuard> {
    acquire_lock(root, LockMode::Shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_blocks_try_from_another_handle() {
        let root = std::env::temp_dir().join(format!(
            "vslock-{}",
            crate::util::generate_hex_id()
        ));
        std::fs::create_dir_all(&root).unwrap();

        let g = acquire_exclusive_lock(&root).unwrap();
        assert_eq!(g.mode(), LockMode::Exclusive);
        assert!(g.path().ends_with(LOCK_FILE));
        assert!(try_acquire_lock(&root, LockMode::Shared).is_err());
        drop(g);

        let s1 = acquire_shared_lock(&root).unwrap();
        let s2 = try_acquire_lock(&root, LockMode::Shared).unwrap();
        assert!(try_acquire_lock(&root, LockMode::Exclusive).is_err());
        drop((s1, s2));

        let _ = std::fs::remove_dir_all(&root);
    }
}
