//! Lineage tracker: the ancestry forest of snapshots resident in one pool.
//!
//! Stored as an explicit index `child -> parent` (parent is None for roots), independent of
//! any naming scheme inside the engine namespace. Each snapshot's ancestry is fixed when it
//! first becomes resident; an edge is removed only together with the snapshot itself, and only
//! when nothing names it as parent.
//!
//! Mutations happen under the pool's exclusive lock; queries under the shared lock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, VolError};
use crate::model::SnapshotId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lineage {
    parents: BTreeMap<SnapshotId, Option<SnapshotId>>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn contains(&self, id: &SnapshotId) -> bool {
        self.parents.contains_key(id)
    }

    /// Recorded parent: None if unknown, Some(None) for a root.
    pub fn parent_of(&self, id: &SnapshotId) -> Option<Option<&SnapshotId>> {
        self.parents.get(id).map(|p| p.as_ref())
    }

    /// Append an edge. Ancestry of a snapshot is assigned exactly once.
    pub fn record_edge(&mut self, parent: Option<&SnapshotId>, child: &SnapshotId) -> Result<()> {
        if let Some(existing) = self.parents.get(child) {
            return Err(VolError::CorruptState(format!(
                "snapshot {} already has recorded ancestry (parent={})",
                child,
                existing
                    .as_ref()
                    .map(|p| p.as_str())
                    .unwrap_or("none")
            )));
        }
        if let Some(p) = parent {
            if p == child {
                return Err(VolError::CorruptState(format!(
                    "snapshot {} cannot be its own parent",
                    child
                )));
            }
            if !self.parents.contains_key(p) {
                return Err(VolError::CorruptState(format!(
                    "parent {} of snapshot {} is not tracked",
                    p, child
                )));
            }
        }
        self.parents.insert(child.clone(), parent.cloned());
        Ok(())
    }

    /// True if `a` is a strict ancestor of `b`. O(depth).
    pub fn is_ancestor(&self, a: &SnapshotId, b: &SnapshotId) -> bool {
        self.check_ancestor(a, b).unwrap_or(false)
    }

    /// Like `is_ancestor`, but reports a cyclic index as `CorruptState`.
    pub fn check_ancestor(&self, a: &SnapshotId, b: &SnapshotId) -> Result<bool> {
        let mut cur = match self.parents.get(b) {
            Some(p) => p.as_ref(),
            None => return Ok(false),
        };
        let mut steps = 0usize;
        while let Some(id) = cur {
            if id == a {
                return Ok(true);
            }
            steps += 1;
            if steps > self.parents.len() {
                return Err(VolError::CorruptState(format!(
                    "lineage cycle detected while walking from {}",
                    b
                )));
            }
            cur = self.parents.get(id).and_then(|p| p.as_ref());
        }
        Ok(false)
    }

    /// Chain from `id` toward the root: [id, parent, grandparent, ...]. Empty if unknown.
    pub fn chain(&self, id: &SnapshotId) -> Result<Vec<SnapshotId>> {
        if !self.parents.contains_key(id) {
            return Ok(Vec::new());
        }
        let mut out = vec![id.clone()];
        let mut cur = self.parents.get(id).and_then(|p| p.as_ref());
        while let Some(p) = cur {
            if out.len() > self.parents.len() {
                return Err(VolError::CorruptState(format!(
                    "lineage cycle detected while walking from {}",
                    id
                )));
            }
            out.push(p.clone());
            cur = self.parents.get(p).and_then(|pp| pp.as_ref());
        }
        Ok(out)
    }

    /// Scan `local_chain` (most recent first) and return the first id the remote side has.
    pub fn closest_common_ancestor(
        local_chain: &[SnapshotId],
        remote_haves: &HashSet<SnapshotId>,
    ) -> Option<SnapshotId> {
        local_chain
            .iter()
            .find(|id| remote_haves.contains(*id))
            .cloned()
    }

    pub fn children<'a>(&'a self, id: &'a SnapshotId) -> impl Iterator<Item = &'a SnapshotId> + 'a {
        self.parents
            .iter()
            .filter(move |(_, p)| p.as_ref() == Some(id))
            .map(|(c, _)| c)
    }

    pub fn has_children(&self, id: &SnapshotId) -> bool {
        self.children(id).next().is_some()
    }

    /// Drop the entry for `id`. Refused while another entry names it as parent.
    pub fn remove(&mut self, id: &SnapshotId) -> Result<()> {
        if let Some(child) = self.children(id).next() {
            return Err(VolError::InUse(
                id.to_string(),
                format!("snapshot {} is derived from it", child),
            ));
        }
        self.parents.remove(id);
        Ok(())
    }

    pub fn ids(&self) -> impl Iterator<Item = &SnapshotId> {
        self.parents.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SnapshotId {
        s.parse().unwrap()
    }

    fn linear(n: usize) -> (Lineage, Vec<SnapshotId>) {
        let mut l = Lineage::new();
        let ids: Vec<SnapshotId> = (0..n).map(|i| sid(&format!("s{i}"))).collect();
        for i in 0..n {
            let parent = if i == 0 { None } else { Some(&ids[i - 1]) };
            l.record_edge(parent, &ids[i]).unwrap();
        }
        (l, ids)
    }

    #[test]
    fn ancestry_is_strict_and_directional() {
        let (l, ids) = linear(4);
        assert!(l.is_ancestor(&ids[0], &ids[3]));
        assert!(l.is_ancestor(&ids[2], &ids[3]));
        assert!(!l.is_ancestor(&ids[3], &ids[0]));
        assert!(!l.is_ancestor(&ids[1], &ids[1]));
        assert!(!l.is_ancestor(&sid("other"), &ids[3]));
        assert!(!l.is_ancestor(&ids[0], &sid("unknown")));
    }

    #[test]
    fn duplicate_ancestry_is_corrupt_state() {
        let (mut l, ids) = linear(2);
        let err = l.record_edge(None, &ids[1]).unwrap_err();
        assert!(matches!(err, VolError::CorruptState(_)), "{err:?}");
        let err = l.record_edge(Some(&sid("ghost")), &sid("new")).unwrap_err();
        assert!(matches!(err, VolError::CorruptState(_)), "{err:?}");
        let err = l.record_edge(Some(&sid("new")), &sid("new")).unwrap_err();
        assert!(matches!(err, VolError::CorruptState(_)), "{err:?}");
    }

    #[test]
    fn chain_and_closest_common_ancestor() {
        let (mut l, ids) = linear(3);
        // branch: s1 -> b0
        l.record_edge(Some(&ids[1]), &sid("b0")).unwrap();

        let chain = l.chain(&ids[2]).unwrap();
        assert_eq!(chain, vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);

        let haves: HashSet<SnapshotId> = [ids[0].clone(), sid("b0")].into_iter().collect();
        assert_eq!(
            Lineage::closest_common_ancestor(&chain[1..], &haves),
            Some(ids[0].clone())
        );

        let haves: HashSet<SnapshotId> = [ids[1].clone(), ids[0].clone()].into_iter().collect();
        assert_eq!(
            Lineage::closest_common_ancestor(&chain[1..], &haves),
            Some(ids[1].clone())
        );

        let none: HashSet<SnapshotId> = [sid("zz")].into_iter().collect();
        assert_eq!(Lineage::closest_common_ancestor(&chain, &none), None);
        assert!(l.chain(&sid("unknown")).unwrap().is_empty());
    }

    #[test]
    fn remove_refused_while_children_exist() {
        let (mut l, ids) = linear(3);
        let err = l.remove(&ids[1]).unwrap_err();
        assert!(matches!(err, VolError::InUse(..)), "{err:?}");
        assert!(l.contains(&ids[1]));

        l.remove(&ids[2]).unwrap();
        l.remove(&ids[1]).unwrap();
        assert_eq!(l.len(), 1);
        assert!(!l.has_children(&ids[0]));
    }

    #[test]
    fn cycle_is_reported() {
        let mut l = Lineage::new();
        // hand-made corrupt index
        l.parents.insert(sid("a"), Some(sid("b")));
        l.parents.insert(sid("b"), Some(sid("a")));
        assert!(matches!(
            l.check_ancestor(&sid("zz"), &sid("a")),
            Err(VolError::CorruptState(_))
        ));
        assert!(!l.is_ancestor(&sid("zz"), &sid("a")));
        assert!(l.chain(&sid("a")).is_err());
    }
}
