//! Typed errors of the volume/snapshot core.
//!
//! Every public pool/transmission operation returns `Result<T, VolError>`. Nothing here is
//! retried internally: `MissingBase`/`InvalidBase` mean the caller negotiated wrongly and must
//! renegotiate; transient I/O or engine failures are left to the caller's own retry policy.
//!
//! Engine diagnostics are carried verbatim so that operators see the tool's own text.

use std::fmt;

use thiserror::Error;

use crate::model::{SnapshotId, VolumeId};

pub type Result<T> = std::result::Result<T, VolError>;

#[derive(Debug, Error)]
pub enum VolError {
    #[error("volume {0} not found in pool")]
    VolumeNotFound(String),

    #[error("volume {0} is not a snapshot")]
    NotASnapshot(VolumeId),

    #[error("volume {0} is a snapshot and cannot be modified")]
    NotWritable(VolumeId),

    #[error("invalid base: snapshot {base} is not an ancestor of {source_id}")]
    InvalidBase {
        base: SnapshotId,
        source_id: SnapshotId,
    },

    #[error("missing base: incremental stream for {source_id} requires snapshot {base}, which is not resident")]
    MissingBase {
        base: SnapshotId,
        source_id: SnapshotId,
    },

    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("engine invocation failed: {op} (exit {}): {diagnostic}", ExitCode(.code))]
    EngineInvocation {
        op: String,
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("snapshot {0} is in use: {1}")]
    InUse(String, String),

    #[error("corrupt pool state: {0}")]
    CorruptState(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl VolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        VolError::Io {
            context: context.into(),
            source,
        }
    }

    /// Engine failure without a process exit status (in-process engines, spawn errors).
    pub fn engine(op: impl Into<String>, err: impl fmt::Display) -> Self {
        VolError::EngineInvocation {
            op: op.into(),
            code: None,
            diagnostic: err.to_string(),
        }
    }

    /// Engine failure from an anyhow chain; the whole context chain is kept.
    pub fn engine_chain(op: impl Into<String>, err: &anyhow::Error) -> Self {
        VolError::EngineInvocation {
            op: op.into(),
            code: None,
            diagnostic: format!("{:#}", err),
        }
    }

    /// Short stable name of the error kind (CLI output, logs).
    pub fn kind(&self) -> &'static str {
        match self {
            VolError::VolumeNotFound(_) => "VolumeNotFound",
            VolError::NotASnapshot(_) => "NotASnapshot",
            VolError::NotWritable(_) => "NotWritable",
            VolError::InvalidBase { .. } => "InvalidBase",
            VolError::MissingBase { .. } => "MissingBase",
            VolError::CorruptStream(_) => "CorruptStream",
            VolError::EngineInvocation { .. } => "EngineInvocation",
            VolError::InUse(..) => "InUse",
            VolError::CorruptState(_) => "CorruptState",
            VolError::Io { .. } => "Io",
        }
    }
}

struct ExitCode<'a>(&'a Option<i32>);

impl fmt::Display for ExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(c) => write!(f, "{}", c),
            None => f.write_str("n/a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_keeps_diagnostic_verbatim() {
        let e = VolError::EngineInvocation {
            op: "zfs send".into(),
            code: Some(1),
            diagnostic: "cannot open 'tank/x@y': dataset does not exist".into(),
        };
        let s = e.to_string();
        assert!(s.contains("exit 1"), "{s}");
        assert!(s.contains("cannot open 'tank/x@y': dataset does not exist"), "{s}");
        assert_eq!(e.kind(), "EngineInvocation");
    }

    #[test]
    fn engine_chain_flattens_context() {
        let inner = anyhow::anyhow!("disk full").context("write datasets/abc/file");
        let e = VolError::engine_chain("dir receive", &inner);
        match e {
            VolError::EngineInvocation { code, diagnostic, .. } => {
                assert_eq!(code, None);
                assert!(diagnostic.contains("write datasets/abc/file"));
                assert!(diagnostic.contains("disk full"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
