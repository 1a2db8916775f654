//! transmit/receive: ReceiveSnapshot: validate, apply into a fresh dataset, register.
//!
//! State machine (each transition logged at debug):
//!   Init -> HeaderParsed -> FullApply            -> Applied
//!                        -> IncrementalValidate  -> Applied
//!   any  -> Failed
//!
//! Atomicity: nothing is registered until the engine finished, the payload terminator was seen
//! and the index was written. Every failure after dataset allocation destroys the dataset.

use log::{debug, info, warn};
use std::fmt;
use std::io::Read;

use super::frame::FrameReader;
use super::header::StreamHeader;
use crate::engine::EngineSnapshot;
use crate::error::{Result, VolError};
use crate::metrics::{
    record_receive_applied, record_receive_discarded, record_receive_failed,
    record_receive_missing_base,
};
use crate::model::{Snapshot, VolumeId};
use crate::pool::core::ExclusiveState;
use crate::pool::Pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Init,
    HeaderParsed,
    FullApply,
    IncrementalValidate,
    Applied,
    Failed,
}

impl fmt::Display for ReceiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReceiveState::Init => "init",
            ReceiveState::HeaderParsed => "header-parsed",
            ReceiveState::FullApply => "full-apply",
            ReceiveState::IncrementalValidate => "incremental-validate",
            ReceiveState::Applied => "applied",
            ReceiveState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct Progress<'p> {
    pool: &'p Pool,
    state: ReceiveState,
}

impl Progress<'_> {
    fn to(&mut self, next: ReceiveState) {
        debug!("receive: pool={}, {} -> {}", self.pool.id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, e: VolError) -> VolError {
        self.to(ReceiveState::Failed);
        record_receive_failed();
        e
    }
}

impl Pool {
    /// Read one stream from `source` and materialize it as a new snapshot volume.
    pub fn receive_snapshot(&self, source: &mut dyn Read) -> Result<Snapshot> {
        let mut p = Progress {
            pool: self,
            state: ReceiveState::Init,
        };
        let mut st = self.exclusive().map_err(|e| p.fail(e))?;

        let (header, header_len) = StreamHeader::read_from(source).map_err(|e| p.fail(e))?;
        p.to(ReceiveState::HeaderParsed);

        let base = match &header.base {
            None => {
                p.to(ReceiveState::FullApply);
                None
            }
            Some(base_id) => {
                p.to(ReceiveState::IncrementalValidate);
                match st.find_snapshot(base_id) {
                    Some(b) => Some(b.clone()),
                    None => {
                        record_receive_missing_base();
                        return Err(p.fail(VolError::MissingBase {
                            base: base_id.clone(),
                            source_id: header.source.clone(),
                        }));
                    }
                }
            }
        };

        let vid = VolumeId::generate();
        let dataset = format!("recv-{}", vid);
        info!(
            "receive: start, pool={}, snapshot={}, mode={}, base={}, dataset={}",
            self.id,
            header.source,
            header.mode(),
            header
                .base
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "null".to_string()),
            dataset
        );

        match self.apply_and_register(&mut st, &header, base.as_ref(), vid, &dataset, source) {
            Ok((snap, wire_bytes)) => {
                p.to(ReceiveState::Applied);
                let total = header_len + wire_bytes;
                record_receive_applied(total);
                info!(
                    "receive: done, pool={}, snapshot={}, volume={}, bytes={}",
                    self.id,
                    header.source,
                    snap.id(),
                    total
                );
                Ok(snap)
            }
            Err(e) => {
                if let Err(ce) = self.engine.destroy_dataset(&dataset) {
                    warn!("receive: discard of {} failed: {}", dataset, ce);
                } else {
                    record_receive_discarded();
                }
                Err(p.fail(e))
            }
        }
    }

    fn apply_and_register(
        &self,
        st: &mut ExclusiveState<'_>,
        header: &StreamHeader,
        base: Option<&Snapshot>,
        vid: VolumeId,
        dataset: &str,
        source: &mut dyn Read,
    ) -> Result<(Snapshot, u64)> {
        let base_es: Option<EngineSnapshot> = base.and_then(Pool::engine_snapshot);
        let mut reader = FrameReader::new(source, header.codec);
        let applied = self.engine.receive(
            dataset,
            header.source.as_str(),
            base_es.as_ref(),
            &mut reader,
        );
        // Source/framing faults explain a following engine failure; prefer them.
        let location = match (reader.take_fault(), applied) {
            (Some(fault), _) => return Err(fault),
            (None, Err(e)) => return Err(e),
            (None, Ok(loc)) => loc,
        };
        reader.finish()?;
        let wire_bytes = reader.wire_bytes();

        let snap = Snapshot::new_snapshot(
            vid.clone(),
            self.id.clone(),
            dataset.to_string(),
            location,
            header.source.clone(),
            header.base.clone(),
            header.created_unix_ms,
        );
        let mut next = (**st).clone();
        if !next.lineage.contains(&header.source) {
            next.lineage
                .record_edge(header.base.as_ref(), &header.source)?;
        } else {
            debug!(
                "receive: snapshot {} already resident in pool {}; keeping its lineage entry",
                header.source, self.id
            );
        }
        next.volumes.insert(vid, snap.clone());
        self.commit(st, next)?;
        Ok((snap, wire_bytes))
    }
}
