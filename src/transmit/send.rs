//! transmit/send: SendSnapshot: validate, write the envelope, frame the engine output.

use log::info;
use std::io::Write;

use super::frame::FrameWriter;
use super::header::{StreamHeader, StreamMode};
use crate::error::{Result, VolError};
use crate::metrics::record_send;
use crate::model::{SnapshotId, Volume};
use crate::pool::core::PoolState;
use crate::pool::Pool;
use crate::util::now_unix_ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendStats {
    pub mode: StreamMode,
    pub source: SnapshotId,
    pub base: Option<SnapshotId>,
    pub header_bytes: u64,
    /// Engine payload bytes before framing/compression.
    pub payload_bytes: u64,
    /// Everything written to the sink.
    pub total_bytes: u64,
}

impl Pool {
    /// Serialize snapshot `snap` (full, or relative to ancestor `base`) into `sink`.
    pub fn send_snapshot(
        &self,
        snap: &Volume,
        base: Option<&Volume>,
        sink: &mut dyn Write,
    ) -> Result<SendStats> {
        if !snap.is_snapshot() {
            return Err(VolError::NotASnapshot(snap.id().clone()));
        }
        if let Some(b) = base {
            if !b.is_snapshot() {
                return Err(VolError::NotASnapshot(b.id().clone()));
            }
        }

        let st = self.shared()?;
        for v in std::iter::once(snap).chain(base) {
            if v.pool_id() != &self.id || !st.is_resident(v) {
                return Err(VolError::VolumeNotFound(v.id().to_string()));
            }
        }
        self.send_locked(&st, snap, base, sink)
    }

    /// Like send_snapshot, addressing snapshots by id. Copies sharing a dataset are preferred.
    pub fn send_by_id(
        &self,
        source: &SnapshotId,
        base: Option<&SnapshotId>,
        sink: &mut dyn Write,
    ) -> Result<SendStats> {
        let st = self.shared()?;
        let (snap, base) = st.send_copies(source, base)?;
        self.send_locked(&st, snap, base, sink)
    }

    /// Send with the pool lock already held in shared mode. Both volumes are resident snapshots.
    pub(crate) fn send_locked(
        &self,
        st: &PoolState,
        snap: &Volume,
        base: Option<&Volume>,
        sink: &mut dyn Write,
    ) -> Result<SendStats> {
        let source = snap
            .snapshot_id()
            .ok_or_else(|| VolError::NotASnapshot(snap.id().clone()))?
            .clone();
        let base_id = match base {
            Some(b) => Some(
                b.snapshot_id()
                    .ok_or_else(|| VolError::NotASnapshot(b.id().clone()))?
                    .clone(),
            ),
            None => None,
        };
        if let Some(b) = &base_id {
            if !st.lineage.check_ancestor(b, &source)? {
                return Err(VolError::InvalidBase {
                    base: b.clone(),
                    source_id: source.clone(),
                });
            }
        }

        let header = StreamHeader::new(
            source.clone(),
            base_id.clone(),
            self.cfg.stream_codec,
            snap.created_unix_ms().unwrap_or_else(now_unix_ms),
        );
        let mode = header.mode();
        info!(
            "send: start, pool={}, snapshot={}, mode={}, base={}, codec={}",
            self.id,
            source,
            mode,
            base_id
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "null".to_string()),
            self.cfg.stream_codec
        );

        let header_bytes = header.write_to(sink)?;
        let es = Pool::engine_snapshot(snap)
            .ok_or_else(|| VolError::NotASnapshot(snap.id().clone()))?;
        let base_es = base.and_then(Pool::engine_snapshot);

        let mut fw = FrameWriter::new(
            sink,
            self.cfg.stream_codec,
            self.cfg.zstd_level,
            self.cfg.chunk_size,
        );
        if let Err(e) = self.engine.send(&es, base_es.as_ref(), &mut fw) {
            // A dead sink surfaces inside the engine as a write error; report the sink.
            return Err(match fw.take_fault() {
                Some(io) => VolError::io("write stream payload", io),
                None => e,
            });
        }
        let frames = fw.finish()?;

        let stats = SendStats {
            mode,
            source,
            base: base_id,
            header_bytes,
            payload_bytes: frames.raw_bytes,
            total_bytes: header_bytes + frames.wire_bytes,
        };
        record_send(mode == StreamMode::Incremental, stats.total_bytes);
        info!(
            "send: done, pool={}, snapshot={}, mode={}, payload_bytes={}, total_bytes={}, chunks={}",
            self.id, stats.source, stats.mode, stats.payload_bytes, stats.total_bytes, frames.chunks
        );
        Ok(stats)
    }
}
