#![allow(non_snake_case)]

// Base modules
pub mod config;
pub mod consts;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod util; // src/util/mod.rs

// Model + lineage
pub mod lineage;
pub mod model; // src/model/{mod,ids,volume}.rs

// Engines (zfs binary, directory trees)
pub mod engine; // src/engine/{mod,zfs,dir,payload}.rs

// Pools, streams, negotiation
pub mod negotiate;
pub mod pool; // src/pool/{mod,core,open,volume,snapshot,factory}.rs
pub mod transmit; // src/transmit/{mod,header,frame,send,receive}.rs

// Content checks
pub mod verify;

// Convenience re-exports
pub use config::{EngineKind, PoolBuilder, StreamCodec, VolConfig};
pub use engine::{DirEngine, EngineSnapshot, SnapshotEngine, ZfsEngine};
pub use error::{Result, VolError};
pub use lineage::Lineage;
pub use model::{PoolId, Snapshot, SnapshotId, Volume, VolumeId, VolumeKind};
pub use negotiate::{negotiate, read_haves, write_haves, Haves, SendPlan};
pub use pool::{DisposablePoolFactory, HostPoolFactory, Pool, PoolFactory};
pub use transmit::{SendStats, StreamHeader, StreamMode};
pub use verify::{dir_contains, dir_listing};
