//! pool/volume: writable volume lifecycle (NewVolume / DestroyVolume).

use log::{info, warn};

use super::core::Pool;
use crate::error::{Result, VolError};
use crate::metrics::record_volume_created;
use crate::model::{Volume, VolumeId};

impl Pool {
    /// Allocate a fresh, empty, writable volume.
    pub fn new_volume(&self) -> Result<Volume> {
        let mut st = self.exclusive()?;
        let id = VolumeId::generate();
        let dataset = format!("vol-{}", id);
        let location = self.engine.create_dataset(&dataset)?;

        let vol = Volume::new_writable(id.clone(), self.id.clone(), dataset.clone(), location);
        let mut next = st.clone();
        next.volumes.insert(id.clone(), vol.clone());
        if let Err(e) = self.commit(&mut st, next) {
            if let Err(ce) = self.engine.destroy_dataset(&dataset) {
                warn!("new_volume: cleanup of {} failed: {}", dataset, ce);
            }
            return Err(e);
        }

        record_volume_created();
        info!(
            "new_volume: pool={}, volume={}, location={}",
            self.id,
            id,
            vol.location().display()
        );
        Ok(vol)
    }

    /// Destroy a writable volume and its dataset. Snapshots must go through delete_snapshot.
    pub fn destroy_volume(&self, id: &VolumeId) -> Result<()> {
        let mut st = self.exclusive()?;
        let vol = st
            .volumes
            .get(id)
            .cloned()
            .ok_or_else(|| VolError::VolumeNotFound(id.to_string()))?;
        if vol.is_snapshot() {
            return Err(VolError::NotWritable(id.clone()));
        }
        if let Some(s) = st
            .volumes
            .values()
            .find(|v| v.is_snapshot() && v.dataset() == vol.dataset())
        {
            let sid = s.snapshot_id().map(|s| s.to_string()).unwrap_or_default();
            return Err(VolError::InUse(
                id.to_string(),
                format!("snapshot {} still lives on dataset {}", sid, vol.dataset()),
            ));
        }

        self.engine.destroy_dataset(vol.dataset())?;
        let mut next = st.clone();
        next.volumes.remove(id);
        self.commit(&mut st, next)?;
        info!("destroy_volume: pool={}, volume={}", self.id, id);
        Ok(())
    }
}
