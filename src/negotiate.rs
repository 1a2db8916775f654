//! negotiate: pick the cheapest basis for a cross-pool send.
//!
//! 1) Receiver reports its haves (Pool::report_haves / report_haves_along).
//! 2) Sender walks the *ancestors* of the snapshot to send, most recent first, and takes the
//!    first one the receiver has (closest common ancestor).
//! 3) Found -> incremental against it; otherwise full.
//!
//! Haves on the wire (LE):
//!   [magic8="VSHAVES1"][len u32][crc32 u32 of body] + JSON {"pool": "...", "snapshots": [...]}

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{self, Read, Write};

use crate::consts::{HAVES_HDR_SIZE, HAVES_MAGIC, HAVES_MAX_BODY};
use crate::error::{Result, VolError};
use crate::lineage::Lineage;
use crate::metrics::record_negotiation;
use crate::model::{PoolId, SnapshotId};
use crate::pool::Pool;
use crate::transmit::{SendStats, StreamMode};

/// Snapshot ids resident on a (receiving) pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Haves {
    pub pool: PoolId,
    pub snapshots: Vec<SnapshotId>,
}

impl Haves {
    pub fn new(pool: PoolId, mut snapshots: Vec<SnapshotId>) -> Self {
        snapshots.sort();
        snapshots.dedup();
        Self { pool, snapshots }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn contains(&self, id: &SnapshotId) -> bool {
        self.snapshots.binary_search(id).is_ok()
    }

    pub fn as_set(&self) -> HashSet<SnapshotId> {
        self.snapshots.iter().cloned().collect()
    }

    /// Keep only ids on `chain` (e.g. the lineage the sender is about to transmit).
    pub fn restrict_to(&self, chain: &[SnapshotId]) -> Haves {
        let keep: Vec<SnapshotId> = chain.iter().filter(|id| self.contains(id)).cloned().collect();
        Haves::new(self.pool.clone(), keep)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPlan {
    pub source: SnapshotId,
    pub base: Option<SnapshotId>,
}

impl SendPlan {
    pub fn mode(&self) -> StreamMode {
        if self.base.is_some() {
            StreamMode::Incremental
        } else {
            StreamMode::Full
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.base.is_some()
    }
}

/// Closest ancestor of `source` (excluding `source` itself) present in `haves`.
pub fn negotiate(lineage: &Lineage, source: &SnapshotId, haves: &Haves) -> Result<SendPlan> {
    let chain = lineage.chain(source)?;
    if chain.is_empty() {
        return Err(VolError::VolumeNotFound(source.to_string()));
    }
    let base = Lineage::closest_common_ancestor(&chain[1..], &haves.as_set());
    record_negotiation(base.is_some());
    debug!(
        "negotiate: source={}, ancestors={}, remote_haves={}, base={}",
        source,
        chain.len() - 1,
        haves.len(),
        base.as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none (full)".to_string())
    );
    Ok(SendPlan {
        source: source.clone(),
        base,
    })
}

// ----- wire -----

pub fn write_haves(w: &mut dyn Write, haves: &Haves) -> Result<u64> {
    let body = serde_json::to_vec(haves)
        .map_err(|e| VolError::CorruptState(format!("serialize haves: {}", e)))?;
    if body.len() > HAVES_MAX_BODY {
        return Err(VolError::CorruptState(format!(
            "haves message too large: {} bytes",
            body.len()
        )));
    }
    let mut hdr = [0u8; HAVES_HDR_SIZE];
    hdr[0..8].copy_from_slice(HAVES_MAGIC);
    LittleEndian::write_u32(&mut hdr[8..12], body.len() as u32);
    let mut h = Crc32::new();
    h.update(&body);
    LittleEndian::write_u32(&mut hdr[12..16], h.finalize());
    w.write_all(&hdr)
        .and_then(|_| w.write_all(&body))
        .and_then(|_| w.flush())
        .map_err(|e| VolError::io("write haves", e))?;
    Ok((HAVES_HDR_SIZE + body.len()) as u64)
}

pub fn read_haves(r: &mut dyn Read) -> Result<Haves> {
    let map_read = |e: io::Error| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            VolError::CorruptStream("truncated haves message".into())
        } else {
            VolError::io("read haves", e)
        }
    };
    let mut hdr = [0u8; HAVES_HDR_SIZE];
    r.read_exact(&mut hdr).map_err(map_read)?;
    if &hdr[0..8] != HAVES_MAGIC {
        return Err(VolError::CorruptStream("bad haves magic".into()));
    }
    let len = LittleEndian::read_u32(&hdr[8..12]) as usize;
    if len > HAVES_MAX_BODY {
        return Err(VolError::CorruptStream(format!(
            "haves body length {} too large",
            len
        )));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).map_err(map_read)?;
    let mut h = Crc32::new();
    h.update(&body);
    if h.finalize() != LittleEndian::read_u32(&hdr[12..16]) {
        return Err(VolError::CorruptStream("haves checksum mismatch".into()));
    }
    let haves: Haves = serde_json::from_slice(&body)
        .map_err(|e| VolError::CorruptStream(format!("haves body: {}", e)))?;
    Ok(Haves::new(haves.pool, haves.snapshots))
}

// ----- pool side -----

impl Pool {
    /// Every snapshot id resident in this pool.
    pub fn report_haves(&self) -> Result<Haves> {
        let st = self.shared()?;
        Ok(Haves::new(self.id.clone(), st.lineage.ids().cloned().collect()))
    }

    /// Haves restricted to the lineage of local snapshot `along` (itself and its ancestors).
    pub fn report_haves_along(&self, along: &SnapshotId) -> Result<Haves> {
        let st = self.shared()?;
        let chain = st.lineage.chain(along)?;
        Ok(Haves::new(self.id.clone(), chain))
    }

    /// Plan a send of `source` to a receiver holding `haves`.
    pub fn plan_send(&self, source: &SnapshotId, haves: &Haves) -> Result<SendPlan> {
        let st = self.shared()?;
        negotiate(&st.lineage, source, haves)
    }

    /// Negotiate and send under one shared lock, so the plan cannot go stale in between.
    pub fn send_negotiated(
        &self,
        source: &SnapshotId,
        haves: &Haves,
        sink: &mut dyn Write,
    ) -> Result<(SendPlan, SendStats)> {
        let st = self.shared()?;
        let plan = negotiate(&st.lineage, source, haves)?;
        let (snap, base) = st.send_copies(&plan.source, plan.base.as_ref())?;
        let stats = self.send_locked(&st, snap, base, sink)?;
        Ok((plan, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<SnapshotId> {
        (0..n).map(|_| SnapshotId::generate()).collect()
    }

    #[test]
    fn closest_ancestor_wins_and_source_is_excluded() {
        let s = ids(4);
        let mut l = Lineage::new();
        l.record_edge(None, &s[0]).unwrap();
        l.record_edge(Some(&s[0]), &s[1]).unwrap();
        l.record_edge(Some(&s[1]), &s[2]).unwrap();
        l.record_edge(Some(&s[2]), &s[3]).unwrap();

        let pool = PoolId::generate();
        let haves = Haves::new(pool.clone(), vec![s[0].clone(), s[1].clone(), s[3].clone()]);
        let plan = negotiate(&l, &s[3], &haves).unwrap();
        assert_eq!(plan.base.as_ref(), Some(&s[1]));
        assert!(plan.is_incremental());

        let none = Haves::new(pool, vec![s[3].clone()]);
        let plan = negotiate(&l, &s[3], &none).unwrap();
        assert_eq!(plan.base, None);
        assert_eq!(plan.mode(), StreamMode::Full);
    }

    #[test]
    fn unknown_source_is_not_found() {
        let l = Lineage::new();
        let haves = Haves::new(PoolId::generate(), vec![]);
        let err = negotiate(&l, &SnapshotId::generate(), &haves).unwrap_err();
        assert_eq!(err.kind(), "VolumeNotFound");
    }

    #[test]
    fn haves_message_survives_the_wire() {
        let haves = Haves::new(PoolId::generate(), ids(5));
        let mut buf = Vec::new();
        let n = write_haves(&mut buf, &haves).unwrap();
        assert_eq!(n, buf.len() as u64);
        let got = read_haves(&mut buf.as_slice()).unwrap();
        assert_eq!(got, haves);

        let last = buf.len() - 2;
        buf[last] ^= 0x20;
        assert_eq!(read_haves(&mut buf.as_slice()).unwrap_err().kind(), "CorruptStream");
    }

    #[test]
    fn restrict_keeps_only_chain_members() {
        let s = ids(3);
        let haves = Haves::new(PoolId::generate(), s.clone());
        let r = haves.restrict_to(&[s[1].clone(), SnapshotId::generate()]);
        assert_eq!(r.snapshots, vec![s[1].clone()]);
    }
}
