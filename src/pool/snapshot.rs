//! pool/snapshot: CreateSnapshot / DeleteSnapshot.
//!
//! CreateSnapshot freezes a writable volume and records the edge
//!   (previous snapshot of that volume, if still resident) -> new snapshot.
//! DeleteSnapshot removes every resident copy of an id; refused while the lineage names it
//! as a parent. The index is committed before engine objects are destroyed; destroy failures
//! are logged and leave unregistered leftovers only.

use log::{debug, info, warn};

use super::core::Pool;
use crate::engine::EngineSnapshot;
use crate::error::{Result, VolError};
use crate::metrics::{record_snapshot_created, record_snapshot_deleted};
use crate::model::{Snapshot, SnapshotId, VolumeId};
use crate::util::now_unix_ms;

impl Pool {
    /// Freeze the current content of writable volume `id` into a new snapshot.
    pub fn create_snapshot(&self, id: &VolumeId) -> Result<Snapshot> {
        let mut st = self.exclusive()?;
        let vol = st
            .volumes
            .get(id)
            .cloned()
            .ok_or_else(|| VolError::VolumeNotFound(id.to_string()))?;
        if vol.is_snapshot() {
            return Err(VolError::NotWritable(id.clone()));
        }

        let sid = SnapshotId::generate();
        let parent = vol
            .parent_snapshot()
            .filter(|p| st.lineage.contains(p))
            .cloned();
        let location = self.engine.freeze(vol.dataset(), sid.as_str())?;

        let snap = Snapshot::new_snapshot(
            VolumeId::generate(),
            self.id.clone(),
            vol.dataset().to_string(),
            location,
            sid.clone(),
            parent.clone(),
            now_unix_ms(),
        );

        let mut next = st.clone();
        let staged = next
            .lineage
            .record_edge(parent.as_ref(), &sid)
            .and_then(|_| {
                if let Some(w) = next.volumes.get_mut(id) {
                    w.parent_snapshot = Some(sid.clone());
                }
                next.volumes.insert(snap.id().clone(), snap.clone());
                self.commit(&mut st, next)
            });
        if let Err(e) = staged {
            let es = EngineSnapshot::new(vol.dataset(), sid.as_str());
            if let Err(ce) = self.engine.destroy_snapshot(&es) {
                warn!("create_snapshot: cleanup of {} failed: {}", es, ce);
            }
            return Err(e);
        }

        record_snapshot_created();
        info!(
            "create_snapshot: pool={}, volume={}, snapshot={}, parent={}",
            self.id,
            id,
            sid,
            parent
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "null".to_string())
        );
        Ok(snap)
    }

    /// Delete every resident copy of snapshot `sid`.
    pub fn delete_snapshot(&self, sid: &SnapshotId) -> Result<()> {
        let mut st = self.exclusive()?;
        let copies: Vec<Snapshot> = st.copies_of(sid).cloned().collect();
        if copies.is_empty() {
            return Err(VolError::VolumeNotFound(sid.to_string()));
        }
        if let Some(child) = st.lineage.children(sid).next() {
            return Err(VolError::InUse(
                sid.to_string(),
                format!("it is the recorded parent of snapshot {}", child),
            ));
        }

        let mut next = st.clone();
        for copy in &copies {
            next.volumes.remove(copy.id());
        }
        next.lineage.remove(sid)?;
        for v in next.volumes.values_mut() {
            if v.is_writable() && v.parent_snapshot() == Some(sid) {
                v.parent_snapshot = None;
            }
        }
        // Index first; engine cleanup below is best-effort.
        self.commit(&mut st, next)?;

        for copy in &copies {
            let es = EngineSnapshot::new(copy.dataset(), sid.as_str());
            if let Err(e) = self.engine.destroy_snapshot(&es) {
                warn!("delete_snapshot: destroy {} failed: {}", es, e);
                continue;
            }
            // A received copy owns its dataset; drop it once nothing else lives there.
            let shared = st.volumes.values().any(|v| v.dataset() == copy.dataset());
            if !shared {
                debug!("delete_snapshot: dataset {} no longer used", copy.dataset());
                if let Err(e) = self.engine.destroy_dataset(copy.dataset()) {
                    warn!("delete_snapshot: destroy {} failed: {}", copy.dataset(), e);
                }
            }
        }

        record_snapshot_deleted();
        info!(
            "delete_snapshot: pool={}, snapshot={}, copies={}",
            self.id,
            sid,
            copies.len()
        );
        Ok(())
    }
}
