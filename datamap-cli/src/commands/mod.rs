pub mod plan;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// `path` made absolute against the current directory.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(cwd.join(path))
}

/// The bucket name with surrounding slashes removed, if any is left.
pub(crate) fn bucket_name(raw: Option<&str>) -> Option<String> {
    raw.map(|name| name.trim_matches('/'))
        .filter(|name| !name.is_empty())
        .map(String::from)
}
