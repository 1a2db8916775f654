//! Lightweight global metrics for VolSnap.
//!
//! Process-wide atomic counters for:
//! - Volumes / snapshots (created, deleted)
//! - Send (full / incremental streams, bytes)
//! - Receive (applied, failed, missing-base rejections, discarded datasets)
//! - Negotiation (plans resolved to incremental / full)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Volumes / snapshots -----
static VOLUMES_CREATED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_CREATED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_DELETED: AtomicU64 = AtomicU64::new(0);

// ----- Send -----
static SEND_FULL_STREAMS: AtomicU64 = AtomicU64::new(0);
static SEND_INCREMENTAL_STREAMS: AtomicU64 = AtomicU64::new(0);
static SEND_BYTES: AtomicU64 = AtomicU64::new(0);

// ----- Receive -----
static RECV_APPLIED: AtomicU64 = AtomicU64::new(0);
static RECV_FAILED: AtomicU64 = AtomicU64::new(0);
static RECV_MISSING_BASE: AtomicU64 = AtomicU64::new(0);
static RECV_DISCARDED_DATASETS: AtomicU64 = AtomicU64::new(0);
static RECV_BYTES: AtomicU64 = AtomicU64::new(0);

// ----- Negotiation -----
static NEGOTIATED_INCREMENTAL: AtomicU64 = AtomicU64::new(0);
static NEGOTIATED_FULL: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub volumes_created: u64,
    pub snapshots_created: u64,
    pub snapshots_deleted: u64,

    pub send_full_streams: u64,
    pub send_incremental_streams: u64,
    pub send_bytes: u64,

    pub recv_applied: u64,
    pub recv_failed: u64,
    pub recv_missing_base: u64,
    pub recv_discarded_datasets: u64,
    pub recv_bytes: u64,

    pub negotiated_incremental: u64,
    pub negotiated_full: u64,
}

impl MetricsSnapshot {
    /// Share of sends that went out incremental.
    pub fn incremental_ratio(&self) -> f64 {
        let total = self.send_full_streams + self.send_incremental_streams;
        if total == 0 {
            0.0
        } else {
            self.send_incremental_streams as f64 / total as f64
        }
    }
}

// ----- Recorders -----
pub fn record_volume_created() {
    VOLUMES_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_created() {
    SNAPSHOTS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_deleted() {
    SNAPSHOTS_DELETED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_send(incremental: bool, bytes: u64) {
    if incremental {
        SEND_INCREMENTAL_STREAMS.fetch_add(1, Ordering::Relaxed);
    } else {
        SEND_FULL_STREAMS.fetch_add(1, Ordering::Relaxed);
    }
    SEND_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

pub fn record_receive_applied(bytes: u64) {
    RECV_APPLIED.fetch_add(1, Ordering::Relaxed);
    RECV_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

pub fn record_receive_failed() {
    RECV_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_receive_missing_base() {
    RECV_MISSING_BASE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_receive_discarded() {
    RECV_DISCARDED_DATASETS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_negotiation(incremental: bool) {
    if incremental {
        NEGOTIATED_INCREMENTAL.fetch_add(1, Ordering::Relaxed);
    } else {
        NEGOTIATED_FULL.fetch_add(1, Ordering::Relaxed);
    }
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        volumes_created: VOLUMES_CREATED.load(Ordering::Relaxed),
        snapshots_created: SNAPSHOTS_CREATED.load(Ordering::Relaxed),
        snapshots_deleted: SNAPSHOTS_DELETED.load(Ordering::Relaxed),

        send_full_streams: SEND_FULL_STREAMS.load(Ordering::Relaxed),
        send_incremental_streams: SEND_INCREMENTAL_STREAMS.load(Ordering::Relaxed),
        send_bytes: SEND_BYTES.load(Ordering::Relaxed),

        recv_applied: RECV_APPLIED.load(Ordering::Relaxed),
        recv_failed: RECV_FAILED.load(Ordering::Relaxed),
        recv_missing_base: RECV_MISSING_BASE.load(Ordering::Relaxed),
        recv_discarded_datasets: RECV_DISCARDED_DATASETS.load(Ordering::Relaxed),
        recv_bytes: RECV_BYTES.load(Ordering::Relaxed),

        negotiated_incremental: NEGOTIATED_INCREMENTAL.load(Ordering::Relaxed),
        negotiated_full: NEGOTIATED_FULL.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    VOLUMES_CREATED.store(0, Ordering::Relaxed);
    SNAPSHOTS_CREATED.store(0, Ordering::Relaxed);
    SNAPSHOTS_DELETED.store(0, Ordering::Relaxed);

    SEND_FULL_STREAMS.store(0, Ordering::Relaxed);
    SEND_INCREMENTAL_STREAMS.store(0, Ordering::Relaxed);
    SEND_BYTES.store(0, Ordering::Relaxed);

    RECV_APPLIED.store(0, Ordering::Relaxed);
    RECV_FAILED.store(0, Ordering::Relaxed);
    RECV_MISSING_BASE.store(0, Ordering::Relaxed);
    RECV_DISCARDED_DATASETS.store(0, Ordering::Relaxed);
    RECV_BYTES.store(0, Ordering::Relaxed);

    NEGOTIATED_INCREMENTAL.store(0, Ordering::Relaxed);
    NEGOTIATED_FULL.store(0, Ordering::Relaxed);
}
