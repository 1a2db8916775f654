//! Centralized configuration and builder for VolSnap pools.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - VolConfig::from_env() reads the VS_* variables; fluent setters override them.
//! - PoolBuilder produces a VolConfig and opens/creates a Pool with it.
//!
//! Env:
//! - VS_ENGINE        = dir | zfs            (default dir)
//! - VS_ZFS_BIN       = path to zfs binary   (default "zfs")
//! - VS_ZFS_PARENT    = parent dataset for production pools, e.g. "tank/volsnap"
//! - VS_STREAM_CODEC  = none | zstd          (default none)
//! - VS_ZSTD_LEVEL    = zstd level           (default 3)
//! - VS_CHUNK_SIZE    = payload chunk bytes  (default 1 MiB, clamped to [4 KiB, 16 MiB])
//! - VS_INDEX_FSYNC   = 0|1                  (default 1)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::consts::{
    DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, STREAM_CODEC_NONE, STREAM_CODEC_ZSTD,
};
use crate::error::Result;
use crate::pool::Pool;

/// Which engine backs a pool's namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Portable directory-tree engine (tests, hosts without ZFS).
    Dir,
    /// `zfs` binary driven as an external process.
    Zfs,
}

impl FromStr for EngineKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dir" | "directory" => Ok(EngineKind::Dir),
            "zfs" => Ok(EngineKind::Zfs),
            other => Err(format!("unknown engine '{}': expected dir|zfs", other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Dir => f.write_str("dir"),
            EngineKind::Zfs => f.write_str("zfs"),
        }
    }
}

/// Payload chunk codec on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamCodec {
    None,
    Zstd,
}

impl StreamCodec {
    pub fn wire_id(self) -> u8 {
        match self {
            StreamCodec::None => STREAM_CODEC_NONE,
            StreamCodec::Zstd => STREAM_CODEC_ZSTD,
        }
    }

    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            STREAM_CODEC_NONE => Some(StreamCodec::None),
            STREAM_CODEC_ZSTD => Some(StreamCodec::Zstd),
            _ => None,
        }
    }
}

impl FromStr for StreamCodec {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "raw" | "" => Ok(StreamCodec::None),
            "zstd" => Ok(StreamCodec::Zstd),
            other => Err(format!("unknown stream codec '{}': expected none|zstd", other)),
        }
    }
}

impl fmt::Display for StreamCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCodec::None => f.write_str("none"),
            StreamCodec::Zstd => f.write_str("zstd"),
        }
    }
}

/// Top-level configuration of a pool.
#[derive(Clone, Debug)]
pub struct VolConfig {
    /// Env: VS_ENGINE (default dir)
    pub engine: EngineKind,

    /// Env: VS_ZFS_BIN (default "zfs")
    pub zfs_bin: PathBuf,

    /// Parent dataset under which production pools get their namespace.
    /// Env: VS_ZFS_PARENT (default None; required for EngineKind::Zfs)
    pub zfs_parent: Option<String>,

    /// Env: VS_STREAM_CODEC (default none)
    pub stream_codec: StreamCodec,

    /// Env: VS_ZSTD_LEVEL (default 3)
    pub zstd_level: i32,

    /// Payload chunk size in bytes. Env: VS_CHUNK_SIZE (default 1 MiB)
    pub chunk_size: usize,

    /// fsync the pool index on every mutation. Env: VS_INDEX_FSYNC (default true)
    pub index_fsync: bool,
}

impl Default for VolConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Dir,
            zfs_bin: PathBuf::from("zfs"),
            zfs_parent: None,
            stream_codec: StreamCodec::None,
            zstd_level: 3,
            chunk_size: DEFAULT_CHUNK_SIZE,
            index_fsync: true,
        }
    }
}

fn env_bool(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

impl VolConfig {
    /// Load configuration from environment variables. Unparsable values keep defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("VS_ENGINE") {
            match v.parse::<EngineKind>() {
                Ok(k) => cfg.engine = k,
                Err(e) => log::warn!("config: {e}; keeping {}", cfg.engine),
            }
        }

        if let Ok(v) = std::env::var("VS_ZFS_BIN") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.zfs_bin = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("VS_ZFS_PARENT") {
            let s = v.trim().trim_end_matches('/');
            if !s.is_empty() {
                cfg.zfs_parent = Some(s.to_string());
            }
        }

        if let Ok(v) = std::env::var("VS_STREAM_CODEC") {
            match v.parse::<StreamCodec>() {
                Ok(c) => cfg.stream_codec = c,
                Err(e) => log::warn!("config: {e}; keeping {}", cfg.stream_codec),
            }
        }

        if let Ok(v) = std::env::var("VS_ZSTD_LEVEL") {
            if let Ok(n) = v.trim().parse::<i32>() {
                cfg.zstd_level = n;
            }
        }

        if let Ok(v) = std::env::var("VS_CHUNK_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.chunk_size = clamp_chunk_size(n);
            }
        }

        if let Ok(v) = std::env::var("VS_INDEX_FSYNC") {
            cfg.index_fsync = env_bool(&v);
        }

        cfg
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_zfs_bin<P: Into<PathBuf>>(mut self, bin: P) -> Self {
        self.zfs_bin = bin.into();
        self
    }

    pub fn with_zfs_parent<S: Into<String>>(mut self, parent: Option<S>) -> Self {
        self.zfs_parent = parent.map(Into::into);
        self
    }

    pub fn with_stream_codec(mut self, codec: StreamCodec) -> Self {
        self.stream_codec = codec;
        self
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = clamp_chunk_size(bytes);
        self
    }

    pub fn with_index_fsync(mut self, on: bool) -> Self {
        self.index_fsync = on;
        self
    }

    pub fn build(self) -> Self {
        self
    }
}

pub fn clamp_chunk_size(n: usize) -> usize {
    n.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

impl fmt::Display for VolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VolConfig {{ \
             engine: {}, \
             zfs_bin: {}, \
             zfs_parent: {}, \
             stream_codec: {}, \
             zstd_level: {}, \
             chunk_size: {}, \
             index_fsync: {} \
             }}",
            self.engine,
            self.zfs_bin.display(),
            self.zfs_parent.as_deref().unwrap_or("(none)"),
            self.stream_codec,
            self.zstd_level,
            self.chunk_size,
            self.index_fsync,
        )
    }
}

/// Lightweight builder: collects a VolConfig, then opens or creates a pool.
#[derive(Clone, Debug)]
pub struct PoolBuilder {
    cfg: VolConfig,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: VolConfig::from_env(),
        }
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: VolConfig::default(),
        }
    }

    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.cfg.engine = engine;
        self
    }

    pub fn zfs_bin<P: Into<PathBuf>>(mut self, bin: P) -> Self {
        self.cfg.zfs_bin = bin.into();
        self
    }

    pub fn zfs_parent<S: Into<String>>(mut self, parent: Option<S>) -> Self {
        self.cfg.zfs_parent = parent.map(Into::into);
        self
    }

    pub fn stream_codec(mut self, codec: StreamCodec) -> Self {
        self.cfg.stream_codec = codec;
        self
    }

    pub fn zstd_level(mut self, level: i32) -> Self {
        self.cfg.zstd_level = level;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.cfg.chunk_size = clamp_chunk_size(bytes);
        self
    }

    pub fn index_fsync(mut self, on: bool) -> Self {
        self.cfg.index_fsync = on;
        self
    }

    pub fn build(self) -> VolConfig {
        self.cfg
    }

    /// Create a new pool at `root` with the collected config.
    pub fn create<P: AsRef<Path>>(self, root: P) -> Result<Pool> {
        Pool::create(root.as_ref(), self.cfg)
    }

    /// Open an existing pool at `root` with the collected config.
    pub fn open<P: AsRef<Path>>(self, root: P) -> Result<Pool> {
        Pool::open(root.as_ref(), self.cfg)
    }
}
