//! engine: the external copy-on-write engine behind a pool, seen through one trait.
//!
//! The core never diffs blocks itself. It asks an engine to:
//! - create a writable dataset;
//! - freeze a dataset into a read-only snapshot;
//! - produce a byte stream for a snapshot (optionally relative to an ancestor);
//! - consume a byte stream into a new dataset (optionally relative to a present ancestor).
//!
//! Backends:
//! - ZfsEngine: drives the `zfs` binary (production).
//! - DirEngine: directory trees + file-level delta payload (disposable pools, hosts without ZFS).
//!
//! Any failure is reported as VolError::EngineInvocation with the engine's own diagnostic text.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::{EngineKind, VolConfig};
use crate::consts::DIR_ENGINE_SUBDIR;
use crate::error::{Result, VolError};
use crate::model::PoolId;

pub mod dir;
pub mod payload;
pub mod zfs;

pub use dir::DirEngine;
pub use zfs::ZfsEngine;

/// A frozen snapshot inside an engine namespace ("<dataset>@<name>").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub dataset: String,
    pub name: String,
}

impl EngineSnapshot {
    pub fn new(dataset: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for EngineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.dataset, self.name)
    }
}

pub trait SnapshotEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Human-readable namespace (zfs parent dataset or engine directory).
    fn namespace(&self) -> String;

    /// Create an empty writable dataset; returns its content location.
    fn create_dataset(&self, dataset: &str) -> Result<PathBuf>;

    /// Freeze the current content of `dataset` as snapshot `name`; returns its read-only location.
    fn freeze(&self, dataset: &str, name: &str) -> Result<PathBuf>;

    /// Stream `snap` into `sink`: full content, or the delta against `base`.
    fn send(
        &self,
        snap: &EngineSnapshot,
        base: Option<&EngineSnapshot>,
        sink: &mut dyn Write,
    ) -> Result<()>;

    /// Materialize `dataset@name` from `source`; `base` must already be present when the
    /// stream is a delta. Returns the location of the received snapshot. On error the caller
    /// discards `dataset`.
    fn receive(
        &self,
        dataset: &str,
        name: &str,
        base: Option<&EngineSnapshot>,
        source: &mut dyn Read,
    ) -> Result<PathBuf>;

    fn destroy_snapshot(&self, snap: &EngineSnapshot) -> Result<()>;

    /// Destroy a dataset together with all of its snapshots. Missing dataset is not an error.
    fn destroy_dataset(&self, dataset: &str) -> Result<()>;

    fn dataset_exists(&self, dataset: &str) -> bool;

    /// Tear down the whole namespace (pool destruction).
    fn destroy_namespace(&self) -> Result<()>;
}

/// Build the engine for a new pool rooted at `root`, as selected by `cfg`.
pub fn open_engine(cfg: &VolConfig, root: &Path, pool: &PoolId) -> Result<Box<dyn SnapshotEngine>> {
    match cfg.engine {
        EngineKind::Dir => reopen_engine(EngineKind::Dir, "", cfg, root),
        EngineKind::Zfs => {
            let parent = cfg.zfs_parent.as_deref().ok_or_else(|| {
                VolError::engine(
                    "zfs open",
                    "VS_ZFS_PARENT (zfs_parent) must name the parent dataset for zfs pools",
                )
            })?;
            let namespace = format!("{}/{}", parent, pool);
            reopen_engine(EngineKind::Zfs, &namespace, cfg, root)
        }
    }
}

/// Rebuild the engine of an existing pool from what its index recorded.
/// The directory engine always lives under `<root>/engine`, so a moved pool keeps working.
pub fn reopen_engine(
    kind: EngineKind,
    namespace: &str,
    cfg: &VolConfig,
    root: &Path,
) -> Result<Box<dyn SnapshotEngine>> {
    match kind {
        EngineKind::Dir => Ok(Box::new(DirEngine::open(root.join(DIR_ENGINE_SUBDIR))?)),
        EngineKind::Zfs => {
            if namespace.is_empty() {
                return Err(VolError::CorruptState(
                    "zfs pool index has an empty namespace".into(),
                ));
            }
            Ok(Box::new(ZfsEngine::new(
                cfg.zfs_bin.clone(),
                namespace.to_string(),
            )))
        }
    }
}
