//! Domain types shared by every pipeline stage.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A geographic partition of the point dataset, e.g. `ne` or `sw`.
///
/// Shard names end up inside file names split on `_`, so they never contain
/// an underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardName(pub String);

impl ShardName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `map_<shard>.csv`, the export file for a shard that never rotated.
    pub fn csv_file_name(&self) -> String {
        format!("map_{}.csv", self.0)
    }

    /// `submap_<shard>_<serial>.csv`, a rotated export segment.
    pub fn segment_file_name(&self, serial: usize) -> String {
        format!("submap_{}_{serial:04}.csv", self.0)
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ShardName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ShardName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tiles
// ---------------------------------------------------------------------------

/// A slippy-map tile position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Relative path of the rendered image: `<zoom>/<x>/<y><suffix>.png`.
    pub fn image_path(&self, suffix: &str) -> String {
        format!("{}/{}/{}{suffix}.png", self.zoom, self.x, self.y)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Per-run outcome counts of the sync stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub tile_new: u64,
    pub tile_changed: u64,
    pub tile_deleted: u64,
    pub tile_failed: u64,
}

impl SyncCounts {
    /// Files handled so far, failures included.
    pub fn total(&self) -> u64 {
        self.tile_new + self.tile_changed + self.tile_deleted + self.tile_failed
    }
}

/// Counts and durations for one pipeline run.
///
/// Fields are filled in as stages complete; stages that did not run are
/// omitted from the serialized status record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_duration_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quadtree_duration_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_converted_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate_quadtree_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quadtree_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_duration_s: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_duration_s: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_duration_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles_unchanged: Option<u64>,
    #[serde(flatten)]
    pub sync: Option<SyncCounts>,
}

/// `""` for a count of one, `"s"` otherwise, for progress messages.
pub fn plural<N: PartialEq + From<u8>>(count: N) -> &'static str {
    if count == N::from(1) {
        ""
    } else {
        "s"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
