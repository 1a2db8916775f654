use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ids::{PoolId, SnapshotId, VolumeId};

/// Writable volume or frozen snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeKind {
    Writable,
    Snapshot {
        // flattened into Volume, which already has "id"
        #[serde(rename = "snapshot_id")]
        id: SnapshotId,
        created_unix_ms: u64,
    },
}

/// A volume as the pool sees it.
///
/// Snapshots are volumes too: same attributes plus an immutable kind carrying the snapshot id
/// and creation time. `parent_snapshot` is the previous snapshot of a writable volume, or the
/// lineage parent of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub(crate) id: VolumeId,
    pub(crate) pool: PoolId,
    /// Engine dataset backing this volume (one dataset per writable volume or received stream).
    pub(crate) dataset: String,
    pub(crate) parent_snapshot: Option<SnapshotId>,
    pub(crate) location: PathBuf,
    #[serde(flatten)]
    pub(crate) kind: VolumeKind,
}

impl Volume {
    pub(crate) fn new_writable(
        id: VolumeId,
        pool: PoolId,
        dataset: String,
        location: PathBuf,
    ) -> Self {
        Self {
            id,
            pool,
            dataset,
            parent_snapshot: None,
            location,
            kind: VolumeKind::Writable,
        }
    }

    pub(crate) fn new_snapshot(
        id: VolumeId,
        pool: PoolId,
        dataset: String,
        location: PathBuf,
        snapshot: SnapshotId,
        parent: Option<SnapshotId>,
        created_unix_ms: u64,
    ) -> Self {
        Self {
            id,
            pool,
            dataset,
            parent_snapshot: parent,
            location,
            kind: VolumeKind::Snapshot {
                id: snapshot,
                created_unix_ms,
            },
        }
    }

    pub fn id(&self) -> &VolumeId {
        &self.id
    }

    pub fn pool_id(&self) -> &PoolId {
        &self.pool
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.kind, VolumeKind::Snapshot { .. })
    }

    pub fn is_writable(&self) -> bool {
        !self.is_snapshot()
    }

    pub fn kind(&self) -> &VolumeKind {
        &self.kind
    }

    pub fn snapshot_id(&self) -> Option<&SnapshotId> {
        match &self.kind {
            VolumeKind::Snapshot { id, .. } => Some(id),
            VolumeKind::Writable => None,
        }
    }

    pub fn created_unix_ms(&self) -> Option<u64> {
        match &self.kind {
            VolumeKind::Snapshot {
                created_unix_ms, ..
            } => Some(*created_unix_ms),
            VolumeKind::Writable => None,
        }
    }

    pub fn parent_snapshot(&self) -> Option<&SnapshotId> {
        self.parent_snapshot.as_ref()
    }
}

/// Snapshots are represented by frozen volumes.
pub type Snapshot = Volume;
