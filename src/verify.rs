//! Content checks on a volume/snapshot location (tests, CLI `verify`).

use std::fs;
use std::path::Path;

use crate::error::{Result, VolError};

/// Sorted names of the top-level entries under `path`.
pub fn dir_listing(path: &Path) -> Result<Vec<String>> {
    let rd = fs::read_dir(path)
        .map_err(|e| VolError::io(format!("read_dir {}", path.display()), e))?;
    let mut names = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| VolError::io(format!("read_dir {}", path.display()), e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// True when every name in `expected` is a top-level entry of `path`.
pub fn dir_contains<S: AsRef<str>>(path: &Path, expected: &[S]) -> Result<bool> {
    let listing = dir_listing(path)?;
    Ok(expected
        .iter()
        .all(|name| listing.binary_search_by(|n| n.as_str().cmp(name.as_ref())).is_ok()))
}
