//! engine/zfs: production engine driving the `zfs` command line tool.
//!
//! Mapping:
//! - create_dataset   -> zfs create -p <ns>/<ds>
//! - freeze           -> zfs snapshot <ns>/<ds>@<name>
//! - send             -> zfs send [-i <ns>/<base_ds>@<base>] <ns>/<ds>@<name>   (stdout -> sink)
//! - receive          -> zfs receive [-o origin=<base>] <ns>/<ds>@<name>         (source -> stdin)
//! - destroy_snapshot -> zfs destroy <ns>/<ds>@<name>
//! - destroy_dataset  -> zfs destroy -r <ns>/<ds>
//!
//! Incremental receives are cloned from their base (origin=...), which lets later incremental
//! sends use the base as `-i` source even though it lives on another dataset.
//! Non-zero exit => VolError::EngineInvocation with the exit code and zfs' stderr verbatim.

use log::{debug, warn};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use super::{EngineSnapshot, SnapshotEngine};
use crate::config::EngineKind;
use crate::error::{Result, VolError};

const PUMP_BUF: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct ZfsEngine {
    bin: PathBuf,
    namespace: String,
}

enum PumpError {
    Source(io::Error),
    Sink(io::Error),
}

impl ZfsEngine {
    /// `namespace` is the parent dataset of this pool, e.g. "tank/volsnap/<pool_id>".
    pub fn new(bin: PathBuf, namespace: String) -> Self {
        Self { bin, namespace }
    }

    fn full(&self, dataset: &str) -> String {
        format!("{}/{}", self.namespace, dataset)
    }

    fn full_snap(&self, snap: &EngineSnapshot) -> String {
        format!("{}@{}", self.full(&snap.dataset), snap.name)
    }

    pub(crate) fn send_args(&self, snap: &EngineSnapshot, base: Option<&EngineSnapshot>) -> Vec<String> {
        let mut args = vec!["send".to_string()];
        if let Some(b) = base {
            args.push("-i".to_string());
            args.push(self.full_snap(b));
        }
        args.push(self.full_snap(snap));
        args
    }

    pub(crate) fn receive_args(
        &self,
        dataset: &str,
        name: &str,
        base: Option<&EngineSnapshot>,
    ) -> Vec<String> {
        let mut args = vec!["receive".to_string()];
        if let Some(b) = base {
            args.push("-o".to_string());
            args.push(format!("origin={}", self.full_snap(b)));
        }
        args.push(format!("{}@{}", self.full(dataset), name));
        args
    }

    /// Run zfs to completion and return its stdout.
    fn run(&self, op: &str, args: &[String]) -> Result<String> {
        debug!("zfs: {} {}", self.bin.display(), args.join(" "));
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| VolError::engine(op, format!("spawn {}: {}", self.bin.display(), e)))?;
        if !output.status.success() {
            return Err(VolError::EngineInvocation {
                op: op.to_string(),
                code: output.status.code(),
                diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn spawn(&self, op: &str, args: &[String], stdin: Stdio, stdout: Stdio) -> Result<Child> {
        debug!("zfs: {} {}", self.bin.display(), args.join(" "));
        Command::new(&self.bin)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VolError::engine(op, format!("spawn {}: {}", self.bin.display(), e)))
    }

    fn mountpoint(&self, full: &str) -> Result<PathBuf> {
        let out = self.run(
            "zfs get mountpoint",
            &[
                "get".into(),
                "-H".into(),
                "-o".into(),
                "value".into(),
                "mountpoint".into(),
                full.to_string(),
            ],
        )?;
        let mp = out.trim();
        if mp.is_empty() || mp == "-" || mp == "none" || mp == "legacy" {
            return Err(VolError::engine(
                "zfs get mountpoint",
                format!("dataset {} has no usable mountpoint ({:?})", full, mp),
            ));
        }
        Ok(PathBuf::from(mp))
    }

    fn snapshot_location(&self, dataset: &str, name: &str) -> Result<PathBuf> {
        Ok(self
            .mountpoint(&self.full(dataset))?
            .join(".zfs")
            .join("snapshot")
            .join(name))
    }

    fn exists(&self, full: &str) -> bool {
        Command::new(&self.bin)
            .args(["list", "-H", "-o", "name", full])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl SnapshotEngine for ZfsEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Zfs
    }

    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    fn create_dataset(&self, dataset: &str) -> Result<PathBuf> {
        let full = self.full(dataset);
        self.run("zfs create", &["create".into(), "-p".into(), full.clone()])?;
        self.mountpoint(&full)
    }

    fn freeze(&self, dataset: &str, name: &str) -> Result<PathBuf> {
        let snap = format!("{}@{}", self.full(dataset), name);
        self.run("zfs snapshot", &["snapshot".into(), snap])?;
        self.snapshot_location(dataset, name)
    }

    fn send(
        &self,
        snap: &EngineSnapshot,
        base: Option<&EngineSnapshot>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let op = if base.is_some() { "zfs send -i" } else { "zfs send" };
        let args = self.send_args(snap, base);
        let mut child = self.spawn(op, &args, Stdio::null(), Stdio::piped())?;
        let stderr = drain_stderr(&mut child);
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VolError::engine(op, "child stdout not captured"))?;

        let pumped = pump(&mut stdout, sink);
        drop(stdout);
        if let Err(PumpError::Sink(e)) = &pumped {
            // The reader side is gone; stop zfs instead of letting it block on a full pipe.
            let _ = child.kill();
            let _ = child.wait();
            let _ = join_stderr(stderr);
            return Err(VolError::io(format!("{}: write stream", op), clone_io(e)));
        }

        let status = child
            .wait()
            .map_err(|e| VolError::io(format!("{}: wait", op), e))?;
        let diagnostic = join_stderr(stderr);
        if !status.success() {
            return Err(VolError::EngineInvocation {
                op: op.to_string(),
                code: status.code(),
                diagnostic,
            });
        }
        match pumped {
            Ok(n) => {
                debug!("zfs send: {} bytes for {}", n, self.full_snap(snap));
                Ok(())
            }
            Err(PumpError::Source(e)) => Err(VolError::engine(op, format!("read zfs stdout: {}", e))),
            Err(PumpError::Sink(e)) => Err(VolError::io(format!("{}: write stream", op), e)),
        }
    }

    fn receive(
        &self,
        dataset: &str,
        name: &str,
        base: Option<&EngineSnapshot>,
        source: &mut dyn Read,
    ) -> Result<PathBuf> {
        let op = "zfs receive";
        let args = self.receive_args(dataset, name, base);
        let mut child = self.spawn(op, &args, Stdio::piped(), Stdio::null())?;
        let stderr = drain_stderr(&mut child);
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VolError::engine(op, "child stdin not captured"))?;

        let pumped = pump(source, &mut stdin);
        if let Err(PumpError::Source(e)) = &pumped {
            // Never let zfs commit a partial stream.
            let _ = child.kill();
            let _ = child.wait();
            drop(stdin);
            let _ = join_stderr(stderr);
            return Err(VolError::engine(op, format!("stream source failed: {}", e)));
        }
        drop(stdin);

        let status = child
            .wait()
            .map_err(|e| VolError::io(format!("{}: wait", op), e))?;
        let diagnostic = join_stderr(stderr);
        if !status.success() {
            return Err(VolError::EngineInvocation {
                op: op.to_string(),
                code: status.code(),
                diagnostic,
            });
        }
        if let Err(PumpError::Sink(e)) = pumped {
            return Err(VolError::engine(op, format!("write zfs stdin: {}", e)));
        }
        self.snapshot_location(dataset, name)
    }

    fn destroy_snapshot(&self, snap: &EngineSnapshot) -> Result<()> {
        self.run("zfs destroy", &["destroy".into(), self.full_snap(snap)])?;
        Ok(())
    }

    fn destroy_dataset(&self, dataset: &str) -> Result<()> {
        let full = self.full(dataset);
        if !self.exists(&full) {
            return Ok(());
        }
        self.run("zfs destroy -r", &["destroy".into(), "-r".into(), full])?;
        Ok(())
    }

    fn dataset_exists(&self, dataset: &str) -> bool {
        self.exists(&self.full(dataset))
    }

    fn destroy_namespace(&self) -> Result<()> {
        if !self.exists(&self.namespace) {
            return Ok(());
        }
        self.run(
            "zfs destroy -r",
            &["destroy".into(), "-r".into(), self.namespace.clone()],
        )?;
        Ok(())
    }
}

fn pump(src: &mut dyn Read, dst: &mut dyn Write) -> std::result::Result<u64, PumpError> {
    let mut buf = vec![0u8; PUMP_BUF];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PumpError::Source(e)),
        };
        dst.write_all(&buf[..n]).map_err(PumpError::Sink)?;
        total += n as u64;
    }
    dst.flush().map_err(PumpError::Sink)?;
    Ok(total)
}

fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut err = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut s = String::new();
        if let Err(e) = err.read_to_string(&mut s) {
            warn!("zfs: failed to read stderr: {}", e);
        }
        s
    }))
}

fn join_stderr(h: Option<JoinHandle<String>>) -> String {
    h.and_then(|h| h.join().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn clone_io(e: &io::Error) -> io::Error {
    io::Error::new(e.kind(), e.to_string())
}
