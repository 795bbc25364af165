//! Sync plan: diff the local tile tree against the remote inventory.
//!
//! Per local `.png`, in walk order:
//!
//! 1. not in the inventory → upload
//! 2. size differs → update, without hashing
//! 3. same size, hash differs → update
//! 4. otherwise unchanged
//!
//! Inventory entries no local file claimed are deleted, in key order.

use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use datamap_core::plural;

use crate::error::SyncError;
use crate::hash::ContentHasher;
use crate::inventory::Inventory;

/// What a sync run must do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub upload: Vec<String>,
    pub update: Vec<String>,
    pub delete: Vec<String>,
    pub unchanged: u64,
}

impl SyncPlan {
    /// Whether running this plan would change the remote store.
    pub fn is_empty(&self) -> bool {
        self.upload.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Files the plan touches.
    pub fn file_count(&self) -> usize {
        self.upload.len() + self.update.len() + self.delete.len()
    }
}

/// Compare every `.png` under `tiles_dir` with `remote`.
pub fn compute_plan(
    tiles_dir: &Path,
    mut remote: Inventory,
    hasher: &dyn ContentHasher,
) -> Result<SyncPlan, SyncError> {
    let mut plan = SyncPlan::default();

    let walk = WalkDir::new(tiles_dir).sort_by_file_name();
    for entry in walk {
        let entry = entry?;
        if !entry.file_type().is_file() || !entry.file_name().to_string_lossy().ends_with(".png")
        {
            continue;
        }
        let path = entry.path();
        let Some(key) = relative_key(tiles_dir, path) else {
            continue;
        };

        let Some(object) = remote.remove(&key) else {
            plan.upload.push(key);
            continue;
        };
        let size = entry.metadata()?.len();
        if size != object.size || hasher.hash_file(path)? != object.etag {
            plan.update.push(key);
        } else {
            plan.unchanged += 1;
        }
    }
    plan.delete = remote.into_keys().collect();

    tracing::debug!(
        "Planned sync: {} new tile{} to upload, {} changed tile{} to update, \
         {} orphaned tile{} to delete, and {} unchanged tile{}",
        plan.upload.len(),
        plural(plan.upload.len()),
        plan.update.len(),
        plural(plan.update.len()),
        plan.delete.len(),
        plural(plan.delete.len()),
        plan.unchanged,
        plural(plan.unchanged),
    );
    Ok(plan)
}

/// `<tiles_dir>/1/0/0.png` → `1/0/0.png`, always `/`-separated.
fn relative_key(tiles_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(tiles_dir).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
