//! Pipeline configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.datamap/
//!   config.yaml   (optional; every field has a default)
//! ```
//!
//! # API pattern
//!
//! - `load_at(path)`: explicit file; used in tests with `TempDir`
//! - `load(explicit)`: resolves `--config` or the default path, delegates
//!   to `load_at`
//!
//! A missing default file yields [`DatamapConfig::default`]; a missing
//! explicit file is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ShardName;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_ZOOM: u8 = 11;
/// Encoding at zoom 13 allows a single pixel per point at that level.
pub const DEFAULT_ENCODE_ZOOM: u8 = 13;
pub const DEFAULT_BUCKET_PREFIX: &str = "tiles/";
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 100;
pub const DEFAULT_FILE_ROW_LIMIT: u64 = 10_000_000;
pub const DEFAULT_PAGE_ROW_LIMIT: usize = 200_000;
pub const DEFAULT_PROGRESS_SECONDS: f64 = 5.0;
pub const DEFAULT_SYNC_TASKS_PER_WORKER: usize = 1000;

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Program names and fixed arguments for the external codec tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub encode: PathBuf,
    pub merge: PathBuf,
    pub enumerate: PathBuf,
    pub render: PathBuf,
    pub quantize: PathBuf,
    /// Display flags passed to every `render` call before the tile position.
    pub render_args: Vec<String>,
    /// Arguments for the quantizer; it reads stdin and writes stdout.
    pub quantize_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            encode: PathBuf::from("encode"),
            merge: PathBuf::from("merge"),
            enumerate: PathBuf::from("enumerate"),
            render: PathBuf::from("render"),
            quantize: PathBuf::from("pngquant"),
            render_args: [
                // base zoom, brightness, ramp
                "-B",
                "12:0.0379:0.874",
                // fully saturated blue
                "-c0088FF",
                // transparent where there is no data
                "-t0",
                // point distance tuning: base, distance, ramp
                "-O",
                "16:1600:1.5",
                "-G",
                "0.5",
            ]
            .map(String::from)
            .to_vec(),
            quantize_args: ["--speed", "3", "--quality", "65-95", "32"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatamapConfig {
    /// Highest zoom level rendered.
    pub max_zoom: u8,
    /// Zoom level passed to the encoder.
    pub encode_zoom: u8,
    /// Key prefix of the tile pyramid in the bucket.
    pub bucket_prefix: String,
    /// Keys per bulk delete request.
    pub delete_batch_size: usize,
    /// Emitted rows per CSV segment before rotating.
    pub file_row_limit: u64,
    /// Rows fetched from the data source per page.
    pub page_row_limit: usize,
    /// How often stage progress is logged.
    pub progress_seconds: f64,
    /// Tasks a sync worker handles before its store client is recycled.
    pub sync_tasks_per_worker: usize,
    /// Shards exported, in order; north first since it holds more points.
    pub shards: Vec<ShardName>,
    pub tools: ToolConfig,
}

impl Default for DatamapConfig {
    fn default() -> Self {
        Self {
            max_zoom: DEFAULT_MAX_ZOOM,
            encode_zoom: DEFAULT_ENCODE_ZOOM,
            bucket_prefix: DEFAULT_BUCKET_PREFIX.to_string(),
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            file_row_limit: DEFAULT_FILE_ROW_LIMIT,
            page_row_limit: DEFAULT_PAGE_ROW_LIMIT,
            progress_seconds: DEFAULT_PROGRESS_SECONDS,
            sync_tasks_per_worker: DEFAULT_SYNC_TASKS_PER_WORKER,
            shards: ["ne", "nw", "se", "sw"].map(ShardName::from).to_vec(),
            tools: ToolConfig::default(),
        }
    }
}

impl DatamapConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs_f64(self.progress_seconds)
    }

    /// Reject values that would make a stage loop forever or do nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delete_batch_size == 0 {
            return Err(invalid("delete_batch_size", "must be at least 1"));
        }
        if self.file_row_limit == 0 {
            return Err(invalid("file_row_limit", "must be at least 1"));
        }
        if self.page_row_limit == 0 {
            return Err(invalid("page_row_limit", "must be at least 1"));
        }
        if self.sync_tasks_per_worker == 0 {
            return Err(invalid("sync_tasks_per_worker", "must be at least 1"));
        }
        if !self.progress_seconds.is_finite() || self.progress_seconds < 0.0 {
            return Err(invalid("progress_seconds", "must be a non-negative number"));
        }
        if self.encode_zoom < self.max_zoom {
            return Err(invalid(
                "encode_zoom",
                format!("must not be below max_zoom ({})", self.max_zoom),
            ));
        }
        if self.bucket_prefix.starts_with('/') {
            return Err(invalid("bucket_prefix", "must not start with '/'"));
        }
        if let Some(shard) = self
            .shards
            .iter()
            .find(|s| s.0.is_empty() || s.0.contains('_') || s.0.contains('/'))
        {
            return Err(invalid(
                "shards",
                format!("'{shard}' must be non-empty without '_' or '/'"),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<home>/.datamap/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".datamap").join("config.yaml")
}

/// Load and validate the config at `path`.
///
/// Returns `ConfigError::NotFound` if absent and `ConfigError::Parse` (with
/// path + line context) if malformed.
pub fn load_at(path: &Path) -> Result<DatamapConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: DatamapConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// Load the explicit config file, or the default one if it exists.
pub fn load(explicit: Option<&Path>) -> Result<DatamapConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_at(path);
    }
    match dirs::home_dir().map(|home| config_path_at(&home)) {
        Some(path) if path.exists() => load_at(&path),
        _ => Ok(DatamapConfig::default()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = DatamapConfig::default();
        assert_eq!(config.max_zoom, 11);
        assert_eq!(config.encode_zoom, 13);
        assert_eq!(config.bucket_prefix, "tiles/");
        assert_eq!(config.delete_batch_size, 100);
        assert_eq!(config.file_row_limit, 10_000_000);
        assert_eq!(config.progress_interval(), Duration::from_secs(5));
        assert_eq!(config.shards.len(), 4);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "max_zoom: 4\ntools:\n  quantize: /opt/bin/pngquant\n");
        let config = load_at(&path).expect("load");
        assert_eq!(config.max_zoom, 4);
        assert_eq!(config.tools.quantize, PathBuf::from("/opt/bin/pngquant"));
        assert_eq!(config.tools.encode, PathBuf::from("encode"));
        assert_eq!(config.delete_batch_size, 100);
    }

    #[test]
    fn missing_explicit_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "max_zoom: [unclosed");
        let err = load_at(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("config.yaml"));
    }

    #[rstest]
    #[case("delete_batch_size: 0\n", "delete_batch_size")]
    #[case("file_row_limit: 0\n", "file_row_limit")]
    #[case("page_row_limit: 0\n", "page_row_limit")]
    #[case("max_zoom: 14\n", "encode_zoom")]
    #[case("shards: [north_east]\n", "shards")]
    #[case("bucket_prefix: /tiles/\n", "bucket_prefix")]
    fn invalid_values_are_rejected(#[case] body: &str, #[case] field: &str) {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, body);
        match load_at(&path) {
            Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(got, field),
            other => panic!("expected invalid {field}, got {other:?}"),
        }
    }
}
