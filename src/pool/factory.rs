//! pool/factory: bootstrap and teardown of whole pools.
//!
//! - HostPoolFactory: pools under a fixed base directory with the configured engine
//!   (production; with the zfs engine each pool gets its own child dataset of VS_ZFS_PARENT).
//! - DisposablePoolFactory: directory-engine pools in unique temp dirs, for tests and dry runs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::core::Pool;
use crate::config::{EngineKind, VolConfig};
use crate::error::Result;
use crate::util::generate_hex_id;

pub trait PoolFactory {
    fn create_pool(&self) -> Result<Pool>;
    fn destroy_pool(&self, pool: Pool) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HostPoolFactory {
    base: PathBuf,
    cfg: VolConfig,
}

impl HostPoolFactory {
    pub fn new<P: Into<PathBuf>>(base: P, cfg: VolConfig) -> Self {
        Self {
            base: base.into(),
            cfg,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl PoolFactory for HostPoolFactory {
    fn create_pool(&self) -> Result<Pool> {
        let root = self.base.join(format!("pool-{}", generate_hex_id()));
        Pool::create(&root, self.cfg.clone())
    }

    fn destroy_pool(&self, pool: Pool) -> Result<()> {
        pool.destroy()
    }
}

static NEXT_POOL: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct DisposablePoolFactory {
    prefix: String,
    cfg: VolConfig,
}

impl DisposablePoolFactory {
    /// Directory-engine pools under the system temp dir; other knobs from `cfg`.
    pub fn new(prefix: &str, cfg: VolConfig) -> Self {
        Self {
            prefix: prefix.to_string(),
            cfg: cfg.with_engine(EngineKind::Dir),
        }
    }
}

impl Default for DisposablePoolFactory {
    fn default() -> Self {
        Self::new("volsnap", VolConfig::default().with_index_fsync(false))
    }
}

impl PoolFactory for DisposablePoolFactory {
    fn create_pool(&self) -> Result<Pool> {
        let n = NEXT_POOL.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "{}-{}-{}-{}",
            self.prefix,
            std::process::id(),
            n,
            generate_hex_id()
        ));
        Pool::create(&root, self.cfg.clone())
    }

    fn destroy_pool(&self, pool: Pool) -> Result<()> {
        pool.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposable_pools_are_isolated_and_removed() {
        let f = DisposablePoolFactory::default();
        let a = f.create_pool().unwrap();
        let b = f.create_pool().unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.root(), b.root());
        assert_eq!(a.engine_kind(), EngineKind::Dir);

        let root = a.root().to_path_buf();
        f.destroy_pool(a).unwrap();
        assert!(!root.exists());
        f.destroy_pool(b).unwrap();
    }
}
