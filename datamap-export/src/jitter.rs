//! Jitter policies: one observation row → 0–6 CSV point lines spread inside
//! its grid cell. Recent observations get more points.

use std::fmt::Write as _;

use rand::Rng;

use crate::grid::{GridCell, GRID_SCALE};

/// Most points a single row can expand into.
pub const MAX_POINTS: u64 = 6;

/// Expands one grid cell into CSV point lines `"<lat>,<lon>\n"`.
pub trait Jitter: Send + Sync {
    /// Append the lines for `cell` to `out` and return how many were added.
    fn expand(&self, cell: GridCell, age_bucket: u32, out: &mut String) -> u64;
}

/// Number of points for an age bucket (months since last observation).
pub fn points_for_age(age_bucket: u32) -> u64 {
    MAX_POINTS.saturating_sub(age_bucket as u64)
}

/// Uniformly random points inside the cell, count by age bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgeJitter;

impl Jitter for AgeJitter {
    fn expand(&self, cell: GridCell, age_bucket: u32, out: &mut String) -> u64 {
        let count = points_for_age(age_bucket);
        let mut rng = rand::thread_rng();
        for _ in 0..count {
            let lat = (cell.lat as f64 + rng.gen::<f64>()) / GRID_SCALE;
            let lon = (cell.lon as f64 + rng.gen::<f64>()) / GRID_SCALE;
            push_point(out, lat.clamp(-90.0, 90.0), lon.clamp(-180.0, 180.0));
        }
        count
    }
}

/// Deterministic policy: `copies` lines at the cell origin regardless of age.
///
/// Used where output must be reproducible, e.g. comparing two exports.
#[derive(Debug, Clone, Copy)]
pub struct CellOrigin {
    pub copies: u64,
}

impl Jitter for CellOrigin {
    fn expand(&self, cell: GridCell, _age_bucket: u32, out: &mut String) -> u64 {
        let (lat, lon) = cell.origin_degrees();
        for _ in 0..self.copies {
            push_point(out, lat, lon);
        }
        self.copies
    }
}

fn push_point(out: &mut String, lat: f64, lon: f64) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{lat:.6},{lon:.6}");
}
