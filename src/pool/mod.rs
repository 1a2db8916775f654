//! pool: a set of volumes and snapshots sharing one engine namespace.
//!
//! Submodules:
//! - core.rs    : Pool, PoolState, index persistence, two-level lock, queries
//! - open.rs    : create / open / with_engine / destroy
//! - volume.rs  : NewVolume / DestroyVolume
//! - snapshot.rs: CreateSnapshot / DeleteSnapshot
//! - factory.rs : PoolFactory with host and disposable backends
//!
//! Send/receive live in crate::transmit, negotiation in crate::negotiate.

pub mod core;
pub mod factory;
pub mod open;
pub mod snapshot;
pub mod volume;

pub use self::core::Pool;
pub use factory::{DisposablePoolFactory, HostPoolFactory, PoolFactory};
