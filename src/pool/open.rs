//! pool/open: create/open/destroy a pool rooted at a directory.
//!
//! A pool root holds:
//!   pool.json : index (volumes, lineage, engine kind + namespace)
//!   LOCK      : fs2 advisory lock file
//!   engine/   : directory engine data (dir engine only)

use log::{info, warn};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::RwLock;

use super::core::{index_path, load_index, Pool, PoolState};
use crate::config::{EngineKind, VolConfig};
use crate::engine::{open_engine, reopen_engine, SnapshotEngine};
use crate::error::{Result, VolError};
use crate::lock::acquire_exclusive_lock;
use crate::model::PoolId;
use crate::util::now_unix_ms;

impl Pool {
    /// Initialize a new pool at `root` (created if missing). Fails if a pool already lives there.
    pub fn create(root: &Path, cfg: VolConfig) -> Result<Pool> {
        fs::create_dir_all(root)
            .map_err(|e| VolError::io(format!("create pool root {}", root.display()), e))?;
        let _lock = acquire_exclusive_lock(root)?;
        ensure_uninitialized(root)?;

        let id = PoolId::generate();
        let engine = open_engine(&cfg, root, &id)?;
        Self::init_locked(root, cfg, id, engine)
    }

    /// Open an existing pool. The engine kind and namespace come from the index; `cfg` supplies
    /// the remaining knobs (zfs binary, codec, chunk size, fsync).
    pub fn open(root: &Path, cfg: VolConfig) -> Result<Pool> {
        let _lock = acquire_exclusive_lock(root)?;
        let idx = load_index(root)?.ok_or_else(|| {
            VolError::io(
                format!("open pool {}", root.display()),
                io::Error::new(io::ErrorKind::NotFound, "no pool index (run init first)"),
            )
        })?;
        let kind: EngineKind = idx
            .engine
            .parse()
            .map_err(|e: String| VolError::CorruptState(e))?;
        if kind != cfg.engine {
            warn!(
                "pool {}: configured engine {} ignored, index records {}",
                idx.pool, cfg.engine, kind
            );
        }
        let cfg = cfg.with_engine(kind);
        let engine = reopen_engine(kind, &idx.namespace, &cfg, root)?;
        info!(
            "pool open: id={}, root={}, engine={}, volumes={}, snapshots_tracked={}",
            idx.pool,
            root.display(),
            kind,
            idx.state.volumes.len(),
            idx.state.lineage.len()
        );
        Ok(Pool {
            id: idx.pool,
            root: root.to_path_buf(),
            cfg,
            engine,
            created_unix_ms: idx.created_unix_ms,
            state: RwLock::new(idx.state),
        })
    }

    /// Open the pool at `root` with a caller-supplied engine, initializing it when absent.
    pub fn with_engine(
        root: &Path,
        cfg: VolConfig,
        engine: Box<dyn SnapshotEngine>,
    ) -> Result<Pool> {
        fs::create_dir_all(root)
            .map_err(|e| VolError::io(format!("create pool root {}", root.display()), e))?;
        let _lock = acquire_exclusive_lock(root)?;
        let cfg = cfg.with_engine(engine.kind());
        match load_index(root)? {
            Some(idx) => Ok(Pool {
                id: idx.pool,
                root: root.to_path_buf(),
                cfg,
                engine,
                created_unix_ms: idx.created_unix_ms,
                state: RwLock::new(idx.state),
            }),
            None => Self::init_locked(root, cfg, PoolId::generate(), engine),
        }
    }

    fn init_locked(
        root: &Path,
        cfg: VolConfig,
        id: PoolId,
        engine: Box<dyn SnapshotEngine>,
    ) -> Result<Pool> {
        let pool = Pool {
            id,
            root: root.to_path_buf(),
            cfg,
            engine,
            created_unix_ms: now_unix_ms(),
            state: RwLock::new(PoolState::default()),
        };
        pool.write_index(&pool.index_of(PoolState::default()))?;
        info!(
            "pool create: id={}, root={}, engine={}, namespace={}",
            pool.id,
            root.display(),
            pool.engine.kind(),
            pool.engine.namespace()
        );
        Ok(pool)
    }

    /// Tear the pool down: engine namespace first, then the root directory.
    pub fn destroy(self) -> Result<()> {
        let id = self.id.clone();
        let root = self.root.clone();
        {
            let _st = self.exclusive()?;
            self.engine.destroy_namespace()?;
        }
        drop(self);
        match fs::remove_dir_all(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(VolError::io(format!("remove pool root {}", root.display()), e)),
        }
        info!("pool destroy: id={}, root={}", id, root.display());
        Ok(())
    }
}

fn ensure_uninitialized(root: &Path) -> Result<()> {
    let p = index_path(root);
    if p.exists() {
        return Err(VolError::io(
            format!("create pool {}", root.display()),
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", p.display()),
            ),
        ));
    }
    Ok(())
}
