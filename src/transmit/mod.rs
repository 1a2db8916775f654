//! transmit: snapshot streams between pools.
//!
//! stream = header (header.rs) + chunked engine payload (frame.rs) + terminator
//!
//! - send.rs   : Pool::send_snapshot / send_by_id -> SendStats
//! - receive.rs: Pool::receive_snapshot (atomic: all or nothing)
//!
//! The payload is whatever the pool's engine emits; only the envelope is interpreted here.

pub mod frame;
pub mod header;
pub mod receive;
pub mod send;

pub use frame::{FrameReader, FrameStats, FrameWriter};
pub use header::{StreamHeader, StreamMode};
pub use receive::ReceiveState;
pub use send::SendStats;
