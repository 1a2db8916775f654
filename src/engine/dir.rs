//! engine/dir: portable copy-on-write emulation on plain directories.
//!
//! Layout under the engine root:
//!   datasets/<dataset>/...          writable trees
//!   snapshots/<dataset>@<name>/...  frozen copies (never modified after freeze)
//!
//! Streams (see engine::payload):
//! - full: every entry of the snapshot tree, sorted by path;
//! - incremental: deletions (top-most path only) first, then every entry that is new or whose
//!   kind/mode/size/content hash (xxhash64) differs from the base snapshot.
//!
//! Receive clones the base snapshot into the new dataset (or starts empty), applies the entries,
//! then freezes the result under the requested name. Whatever is left behind on failure is
//! removed by destroy_dataset.

use anyhow::{anyhow, bail, Context};
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::hash::Hasher;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::payload::{self, EntryHeader};
use super::{EngineSnapshot, SnapshotEngine};
use crate::config::EngineKind;
use crate::error::{Result, VolError};
use crate::util::{copy_tree, make_symlink, remove_tree_if_exists};

const DATASETS_DIR: &str = "datasets";
const SNAPSHOTS_DIR: &str = "snapshots";
const HASH_BUF: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir { mode: u32 },
    File { mode: u32, size: u64 },
    Symlink { target: String },
}

impl Node {
    fn same_kind(&self, other: &Node) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug)]
pub struct DirEngine {
    root: PathBuf,
}

impl DirEngine {
    pub fn open(root: PathBuf) -> Result<Self> {
        for sub in [DATASETS_DIR, SNAPSHOTS_DIR] {
            let p = root.join(sub);
            fs::create_dir_all(&p)
                .map_err(|e| VolError::io(format!("create engine dir {}", p.display()), e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.root.join(DATASETS_DIR).join(dataset)
    }

    fn snapshot_path(&self, dataset: &str, name: &str) -> PathBuf {
        self.root
            .join(SNAPSHOTS_DIR)
            .join(format!("{}@{}", dataset, name))
    }

    fn freeze_inner(&self, dataset: &str, name: &str) -> anyhow::Result<PathBuf> {
        check_name(dataset)?;
        check_name(name)?;
        let src = self.dataset_path(dataset);
        if !src.is_dir() {
            bail!("dataset {} does not exist", dataset);
        }
        let dst = self.snapshot_path(dataset, name);
        if fs::symlink_metadata(&dst).is_ok() {
            bail!("snapshot {}@{} already exists", dataset, name);
        }
        let tmp = self
            .root
            .join(SNAPSHOTS_DIR)
            .join(format!(".tmp-{}@{}", dataset, name));
        remove_tree_if_exists(&tmp)?;
        copy_tree(&src, &tmp)?;
        fs::rename(&tmp, &dst)
            .with_context(|| format!("rename {} -> {}", tmp.display(), dst.display()))?;
        Ok(dst)
    }

    fn send_inner(
        &self,
        snap: &EngineSnapshot,
        base: Option<&EngineSnapshot>,
        sink: &mut dyn Write,
    ) -> anyhow::Result<()> {
        let snap_dir = self.existing_snapshot(snap)?;
        let new = walk(&snap_dir)?;

        let Some(base) = base else {
            payload::write_payload_header(sink, false)?;
            for (path, node) in &new {
                write_node(sink, &snap_dir, path, node)?;
            }
            payload::write_end(sink)?;
            debug!("dir send: full {} ({} entries)", snap, new.len());
            return Ok(());
        };

        let base_dir = self.existing_snapshot(base)?;
        let old = walk(&base_dir)?;
        payload::write_payload_header(sink, true)?;

        let mut deleted: HashSet<&str> = HashSet::new();
        for (path, node) in &old {
            let gone = match new.get(path) {
                None => true,
                Some(n) => !n.same_kind(node),
            };
            if gone && !has_deleted_ancestor(path, &deleted) {
                payload::write_delete(sink, path)?;
                deleted.insert(path.as_str());
            }
        }

        let mut puts = 0usize;
        for (path, node) in &new {
            let changed = match old.get(path) {
                None => true,
                Some(prev) if !prev.same_kind(node) => true,
                Some(prev) => match (prev, node) {
                    (Node::File { mode: m0, size: s0 }, Node::File { mode: m1, size: s1 }) => {
                        m0 != m1
                            || s0 != s1
                            || file_hash(&base_dir.join(path))? != file_hash(&snap_dir.join(path))?
                    }
                    _ => prev != node,
                },
            };
            if changed {
                write_node(sink, &snap_dir, path, node)?;
                puts += 1;
            }
        }
        payload::write_end(sink)?;
        debug!(
            "dir send: incremental {} from {} ({} deletes, {} puts)",
            snap,
            base,
            deleted.len(),
            puts
        );
        Ok(())
    }

    fn receive_inner(
        &self,
        dataset: &str,
        name: &str,
        base: Option<&EngineSnapshot>,
        source: &mut dyn Read,
    ) -> anyhow::Result<PathBuf> {
        check_name(dataset)?;
        check_name(name)?;
        let ds_path = self.dataset_path(dataset);
        if fs::symlink_metadata(&ds_path).is_ok() {
            bail!("dataset {} already exists", dataset);
        }
        match base {
            Some(b) => {
                let base_dir = self.existing_snapshot(b)?;
                copy_tree(&base_dir, &ds_path)?;
            }
            None => {
                fs::create_dir_all(&ds_path)
                    .with_context(|| format!("create {}", ds_path.display()))?;
            }
        }

        let incremental = payload::read_payload_header(source)?;
        if incremental != base.is_some() {
            bail!(
                "payload is {} but receive was {}",
                if incremental { "incremental" } else { "full" },
                if base.is_some() { "given a base" } else { "not given a base" }
            );
        }
        let applied = apply_entries(source, &ds_path)?;
        debug!(
            "dir receive: {}@{} applied {} entries (incremental={})",
            dataset, name, applied, incremental
        );
        self.freeze_inner(dataset, name)
    }

    fn existing_snapshot(&self, snap: &EngineSnapshot) -> anyhow::Result<PathBuf> {
        check_name(&snap.dataset)?;
        check_name(&snap.name)?;
        let p = self.snapshot_path(&snap.dataset, &snap.name);
        if !p.is_dir() {
            bail!("snapshot {} does not exist", snap);
        }
        Ok(p)
    }
}

impl SnapshotEngine for DirEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Dir
    }

    fn namespace(&self) -> String {
        self.root.display().to_string()
    }

    fn create_dataset(&self, dataset: &str) -> Result<PathBuf> {
        let run = || -> anyhow::Result<PathBuf> {
            check_name(dataset)?;
            let p = self.dataset_path(dataset);
            if fs::symlink_metadata(&p).is_ok() {
                bail!("dataset {} already exists", dataset);
            }
            fs::create_dir_all(&p).with_context(|| format!("create {}", p.display()))?;
            Ok(p)
        };
        run().map_err(|e| VolError::engine_chain("dir create", &e))
    }

    fn freeze(&self, dataset: &str, name: &str) -> Result<PathBuf> {
        self.freeze_inner(dataset, name)
            .map_err(|e| VolError::engine_chain("dir snapshot", &e))
    }

    fn send(
        &self,
        snap: &EngineSnapshot,
        base: Option<&EngineSnapshot>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        self.send_inner(snap, base, sink)
            .map_err(|e| VolError::engine_chain("dir send", &e))
    }

    fn receive(
        &self,
        dataset: &str,
        name: &str,
        base: Option<&EngineSnapshot>,
        source: &mut dyn Read,
    ) -> Result<PathBuf> {
        self.receive_inner(dataset, name, base, source)
            .map_err(|e| VolError::engine_chain("dir receive", &e))
    }

    fn destroy_snapshot(&self, snap: &EngineSnapshot) -> Result<()> {
        let p = self.snapshot_path(&snap.dataset, &snap.name);
        remove_tree_if_exists(&p).map_err(|e| VolError::engine_chain("dir destroy", &e))
    }

    fn destroy_dataset(&self, dataset: &str) -> Result<()> {
        let run = || -> anyhow::Result<()> {
            check_name(dataset)?;
            remove_tree_if_exists(&self.dataset_path(dataset))?;
            let prefix = format!("{}@", dataset);
            let snaps = self.root.join(SNAPSHOTS_DIR);
            for entry in
                fs::read_dir(&snaps).with_context(|| format!("read_dir {}", snaps.display()))?
            {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(&prefix) || name.starts_with(&format!(".tmp-{}", prefix)) {
                    remove_tree_if_exists(&entry.path())?;
                }
            }
            Ok(())
        };
        run().map_err(|e| VolError::engine_chain("dir destroy -r", &e))
    }

    fn dataset_exists(&self, dataset: &str) -> bool {
        check_name(dataset).is_ok() && self.dataset_path(dataset).is_dir()
    }

    fn destroy_namespace(&self) -> Result<()> {
        remove_tree_if_exists(&self.root).map_err(|e| VolError::engine_chain("dir destroy pool", &e))
    }
}

// ----- names -----

fn check_name(s: &str) -> anyhow::Result<()> {
    if s.is_empty()
        || s.starts_with('.')
        || s.contains(|c: char| c == '/' || c == '\\' || c == '@' || c == '\0')
    {
        bail!("invalid dataset/snapshot name {:?}", s);
    }
    Ok(())
}

// ----- tree walk -----

fn walk(root: &Path) -> anyhow::Result<BTreeMap<String, Node>> {
    let mut out = BTreeMap::new();
    walk_into(root, "", &mut out)?;
    Ok(out)
}

fn walk_into(dir: &Path, prefix: &str, out: &mut BTreeMap<String, Node>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let entry = entry?;
        let name = entry
            .file_name()
            .into_string()
            .map_err(|n| anyhow!("non utf-8 file name {:?} in {}", n, dir.display()))?;
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        let path = entry.path();
        let md = fs::symlink_metadata(&path).with_context(|| format!("stat {}", path.display()))?;
        let ft = md.file_type();
        if ft.is_symlink() {
            let target = fs::read_link(&path)
                .with_context(|| format!("readlink {}", path.display()))?
                .into_os_string()
                .into_string()
                .map_err(|t| anyhow!("non utf-8 symlink target {:?}", t))?;
            out.insert(rel, Node::Symlink { target });
        } else if ft.is_dir() {
            out.insert(rel.clone(), Node::Dir { mode: mode_of(&md) });
            walk_into(&path, &rel, out)?;
        } else if ft.is_file() {
            out.insert(
                rel,
                Node::File {
                    mode: mode_of(&md),
                    size: md.len(),
                },
            );
        } else {
            bail!("unsupported file type at {}", path.display());
        }
    }
    Ok(())
}

fn has_deleted_ancestor(path: &str, deleted: &HashSet<&str>) -> bool {
    let mut idx = 0;
    while let Some(pos) = path[idx..].find('/') {
        if deleted.contains(&path[..idx + pos]) {
            return true;
        }
        idx += pos + 1;
    }
    false
}

fn file_hash(path: &Path) -> anyhow::Result<u64> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut h = twox_hash::XxHash64::with_seed(0);
    let mut buf = vec![0u8; HASH_BUF];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        h.write(&buf[..n]);
    }
    Ok(h.finish())
}

fn write_node(sink: &mut dyn Write, root: &Path, path: &str, node: &Node) -> anyhow::Result<()> {
    match node {
        Node::Dir { mode } => payload::write_dir(sink, path, *mode),
        Node::File { mode, size } => {
            let p = root.join(path);
            let mut f = File::open(&p).with_context(|| format!("open {}", p.display()))?;
            payload::write_file(sink, path, *mode, *size, &mut f)
        }
        Node::Symlink { target } => payload::write_symlink(sink, path, target),
    }
}

// ----- apply -----

/// Apply entries until END. Directory modes are set last so read-only dirs can be filled.
fn apply_entries(source: &mut dyn Read, root: &Path) -> anyhow::Result<usize> {
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();
    let mut applied = 0usize;
    loop {
        let entry = payload::read_entry(source)?;
        if let Some(path) = entry.path() {
            check_no_symlink_parents(root, path)?;
        }
        match entry {
            EntryHeader::End => break,
            EntryHeader::Dir { path, mode } => {
                let p = root.join(&path);
                if let Ok(md) = fs::symlink_metadata(&p) {
                    if !md.is_dir() {
                        remove_tree_if_exists(&p)?;
                    }
                }
                fs::create_dir_all(&p).with_context(|| format!("create {}", p.display()))?;
                dir_modes.push((p, mode));
            }
            EntryHeader::File { path, mode, len } => {
                let p = root.join(&path);
                prepare_parent(&p)?;
                if let Ok(md) = fs::symlink_metadata(&p) {
                    if !md.is_file() {
                        remove_tree_if_exists(&p)?;
                    }
                }
                let mut f = OpenOptions::new()
                    .create(true)
                    .truncate(true)
                    .write(true)
                    .open(&p)
                    .with_context(|| format!("open {}", p.display()))?;
                let copied = std::io::copy(&mut (&mut *source).take(len), &mut f)
                    .with_context(|| format!("write {}", p.display()))?;
                if copied != len {
                    bail!(
                        "truncated file body for {}: expected {} bytes, got {}",
                        path,
                        len,
                        copied
                    );
                }
                drop(f);
                set_mode(&p, mode)?;
            }
            EntryHeader::Symlink { path, target } => {
                let p = root.join(&path);
                prepare_parent(&p)?;
                remove_tree_if_exists(&p)?;
                make_symlink(Path::new(&target), &p)?;
            }
            EntryHeader::Delete { path } => {
                remove_tree_if_exists(&root.join(&path))?;
            }
        }
        applied += 1;
    }
    for (p, mode) in dir_modes.into_iter().rev() {
        set_mode(&p, mode)?;
    }
    Ok(applied)
}

/// Every directory above `rel` must be a real directory (or not exist yet): writing through a
/// symlink the stream itself created would land outside the dataset.
fn check_no_symlink_parents(root: &Path, rel: &str) -> anyhow::Result<()> {
    let mut cur = root.to_path_buf();
    let mut comps: Vec<&str> = rel.split('/').collect();
    comps.pop();
    for comp in comps {
        cur.push(comp);
        match fs::symlink_metadata(&cur) {
            Ok(md) if md.file_type().is_symlink() => {
                bail!("payload path {:?} passes through symlink {}", rel, cur.display())
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(e).with_context(|| format!("stat {}", cur.display())),
        }
    }
    Ok(())
}

fn prepare_parent(p: &Path) -> anyhow::Result<()> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn mode_of(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(md: &fs::Metadata) -> u32 {
    if md.is_dir() {
        0o755
    } else if md.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn set_mode(p: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(p, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {:o} {}", mode, p.display()))
}

#[cfg(not(unix))]
fn set_mode(_p: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}
