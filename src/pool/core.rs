//! pool/core: Pool struct, persisted index and the two-level pool lock.
//!
//! Lock order (always):
//!   1) in-process RwLock over PoolState
//!   2) fs2 advisory lock on <root>/LOCK (shared or exclusive)
//!
//! The index <root>/pool.json is the source of truth shared with other processes: after the
//! file lock is taken, the in-memory state is refreshed when the on-disk generation moved.
//! Mutations work on a copy of the state, persist it, then publish it; a failed index write
//! leaves the published state untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{EngineKind, VolConfig};
use crate::consts::{POOL_INDEX_FILE, POOL_INDEX_VERSION};
use crate::engine::{EngineSnapshot, SnapshotEngine};
use crate::error::{Result, VolError};
use crate::lineage::Lineage;
use crate::lock::{acquire_exclusive_lock, acquire_shared_lock, LockGuard};
use crate::model::{PoolId, SnapshotId, Volume, VolumeId};
use crate::util::{read_json, write_json_atomic};

/// Volumes and lineage of one pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PoolState {
    /// Bumped on every persisted mutation.
    pub generation: u64,
    pub volumes: BTreeMap<VolumeId, Volume>,
    pub lineage: Lineage,
}

impl PoolState {
    /// Resident copies of `sid`, in VolumeId order.
    pub fn copies_of<'a>(&'a self, sid: &SnapshotId) -> impl Iterator<Item = &'a Volume> + 'a {
        let sid = sid.clone();
        self.volumes
            .values()
            .filter(move |v| v.snapshot_id() == Some(&sid))
    }

    pub fn find_snapshot(&self, sid: &SnapshotId) -> Option<&Volume> {
        self.copies_of(sid).next()
    }

    /// Copies of `source` and `base` to send from. zfs only diffs within one filesystem, so a
    /// pair living on the same dataset wins over the first resident copies.
    pub fn send_copies(
        &self,
        source: &SnapshotId,
        base: Option<&SnapshotId>,
    ) -> Result<(&Volume, Option<&Volume>)> {
        let missing = |id: &SnapshotId| VolError::VolumeNotFound(id.to_string());
        let first = self.find_snapshot(source).ok_or_else(|| missing(source))?;
        let base = match base {
            None => return Ok((first, None)),
            Some(b) => b,
        };
        for snap in self.copies_of(source) {
            if let Some(b) = self.copies_of(base).find(|b| b.dataset() == snap.dataset()) {
                return Ok((snap, Some(b)));
            }
        }
        let b = self.find_snapshot(base).ok_or_else(|| missing(base))?;
        Ok((first, Some(b)))
    }

    pub fn is_resident(&self, v: &Volume) -> bool {
        self.volumes.get(v.id()).map_or(false, |r| r == v)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PoolIndex {
    pub version: u32,
    pub pool: PoolId,
    pub engine: String,
    pub namespace: String,
    pub created_unix_ms: u64,
    #[serde(flatten)]
    pub state: PoolState,
}

pub(crate) fn index_path(root: &Path) -> PathBuf {
    root.join(POOL_INDEX_FILE)
}

pub(crate) fn load_index(root: &Path) -> Result<Option<PoolIndex>> {
    let path = index_path(root);
    let idx: Option<PoolIndex> =
        read_json(&path).map_err(|e| VolError::CorruptState(format!("{:#}", e)))?;
    if let Some(i) = &idx {
        if i.version != POOL_INDEX_VERSION {
            return Err(VolError::CorruptState(format!(
                "unsupported pool index version {} in {}",
                i.version,
                path.display()
            )));
        }
    }
    Ok(idx)
}

pub struct Pool {
    pub(crate) id: PoolId,
    pub(crate) root: PathBuf,
    pub(crate) cfg: VolConfig,
    pub(crate) engine: Box<dyn SnapshotEngine>,
    pub(crate) created_unix_ms: u64,
    pub(crate) state: RwLock<PoolState>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("engine", &self.engine.kind())
            .field("namespace", &self.engine.namespace())
            .finish()
    }
}

/// Shared access: file lock first in drop order, then the in-process guard.
pub(crate) struct SharedState<'a> {
    _file: LockGuard,
    guard: RwLockReadGuard<'a, PoolState>,
    fresh: Option<PoolState>,
}

impl Deref for SharedState<'_> {
    type Target = PoolState;
    fn deref(&self) -> &PoolState {
        self.fresh.as_ref().unwrap_or(&*self.guard)
    }
}

pub(crate) struct ExclusiveState<'a> {
    _file: LockGuard,
    guard: RwLockWriteGuard<'a, PoolState>,
}

impl Deref for ExclusiveState<'_> {
    type Target = PoolState;
    fn deref(&self) -> &PoolState {
        &self.guard
    }
}

impl DerefMut for ExclusiveState<'_> {
    fn deref_mut(&mut self) -> &mut PoolState {
        &mut self.guard
    }
}

fn poisoned() -> VolError {
    VolError::CorruptState("pool state lock poisoned by a panicked operation".into())
}

impl Pool {
    pub fn id(&self) -> &PoolId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VolConfig {
        &self.cfg
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// Engine namespace (zfs parent dataset or engine directory).
    pub fn namespace(&self) -> String {
        self.engine.namespace()
    }

    pub fn created_unix_ms(&self) -> u64 {
        self.created_unix_ms
    }

    // ----- locking -----

    pub(crate) fn shared(&self) -> Result<SharedState<'_>> {
        let guard = self.state.read().map_err(|_| poisoned())?;
        let file = acquire_shared_lock(&self.root)?;
        let fresh = match load_index(&self.root)? {
            Some(idx) if idx.state.generation != guard.generation => Some(idx.state),
            _ => None,
        };
        Ok(SharedState {
            _file: file,
            guard,
            fresh,
        })
    }

    pub(crate) fn exclusive(&self) -> Result<ExclusiveState<'_>> {
        let mut guard = self.state.write().map_err(|_| poisoned())?;
        let file = acquire_exclusive_lock(&self.root)?;
        match load_index(&self.root)? {
            Some(idx) if idx.state.generation != guard.generation => {
                log::debug!(
                    "pool {}: reloading index (generation {} -> {})",
                    self.id,
                    guard.generation,
                    idx.state.generation
                );
                *guard = idx.state;
            }
            Some(_) => {}
            None => {
                return Err(VolError::CorruptState(format!(
                    "pool index {} disappeared",
                    index_path(&self.root).display()
                )))
            }
        }
        Ok(ExclusiveState { _file: file, guard })
    }

    // ----- persistence -----

    pub(crate) fn index_of(&self, state: PoolState) -> PoolIndex {
        PoolIndex {
            version: POOL_INDEX_VERSION,
            pool: self.id.clone(),
            engine: self.engine.kind().to_string(),
            namespace: self.engine.namespace(),
            created_unix_ms: self.created_unix_ms,
            state,
        }
    }

    pub(crate) fn write_index(&self, idx: &PoolIndex) -> Result<()> {
        let path = index_path(&self.root);
        write_json_atomic(&path, idx, self.cfg.index_fsync).map_err(|e| {
            let kind = e
                .root_cause()
                .downcast_ref::<io::Error>()
                .map_or(io::ErrorKind::Other, |ioe| ioe.kind());
            VolError::io(
                format!("write pool index {}", path.display()),
                io::Error::new(kind, format!("{:#}", e)),
            )
        })
    }

    /// Persist `next` (generation bumped) and publish it into `st`. On error `st` is unchanged.
    pub(crate) fn commit(&self, st: &mut ExclusiveState<'_>, mut next: PoolState) -> Result<()> {
        next.generation = st.generation + 1;
        let idx = self.index_of(next);
        self.write_index(&idx)?;
        **st = idx.state;
        Ok(())
    }

    pub(crate) fn engine_snapshot(v: &Volume) -> Option<EngineSnapshot> {
        v.snapshot_id()
            .map(|sid| EngineSnapshot::new(v.dataset(), sid.as_str()))
    }

    // ----- queries -----

    pub fn volume(&self, id: &VolumeId) -> Result<Volume> {
        let st = self.shared()?;
        st.volumes
            .get(id)
            .cloned()
            .ok_or_else(|| VolError::VolumeNotFound(id.to_string()))
    }

    pub fn volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.shared()?.volumes.values().cloned().collect())
    }

    /// Resident snapshots, oldest first.
    pub fn snapshots(&self) -> Result<Vec<Volume>> {
        let st = self.shared()?;
        let mut out: Vec<Volume> = st
            .volumes
            .values()
            .filter(|v| v.is_snapshot())
            .cloned()
            .collect();
        out.sort_by_key(|v| (v.created_unix_ms().unwrap_or(0), v.id().clone()));
        Ok(out)
    }

    /// A resident copy of `sid`, if any.
    pub fn find_snapshot(&self, sid: &SnapshotId) -> Result<Option<Volume>> {
        Ok(self.shared()?.find_snapshot(sid).cloned())
    }

    pub fn contains_snapshot(&self, sid: &SnapshotId) -> Result<bool> {
        Ok(self.shared()?.find_snapshot(sid).is_some())
    }

    /// Ancestry of `sid`, most recent first (starting with `sid`). Empty if not resident.
    pub fn chain(&self, sid: &SnapshotId) -> Result<Vec<SnapshotId>> {
        self.shared()?.lineage.chain(sid)
    }

    /// Strict ancestry check within this pool.
    pub fn is_ancestor(&self, a: &SnapshotId, b: &SnapshotId) -> Result<bool> {
        self.shared()?.lineage.check_ancestor(a, b)
    }

    pub fn lineage(&self) -> Result<Lineage> {
        Ok(self.shared()?.lineage.clone())
    }
}
