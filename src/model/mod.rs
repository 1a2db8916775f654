//! In-memory model: pools, volumes, snapshots and their identifiers.

mod ids;
mod volume;

pub use ids::{is_valid_id, PoolId, SnapshotId, VolumeId};
pub use volume::{Snapshot, Volume, VolumeKind};
