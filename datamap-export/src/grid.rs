//! Grid cell keys.
//!
//! A key packs two big-endian `u32`: latitude and longitude in thousandths of
//! a degree, offset by 90,000 and 180,000 so both are unsigned. Byte order
//! makes keys sort north-to-south then west-to-east within a shard table,
//! which is what keyset pagination relies on.

use crate::error::ExportError;

pub const GRID_SCALE: f64 = 1000.0;
const LAT_OFFSET: i64 = 90_000;
const LON_OFFSET: i64 = 180_000;

/// A grid cell in thousandths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCell {
    pub lat: i32,
    pub lon: i32,
}

impl GridCell {
    pub fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    /// South-west corner of the cell in degrees.
    pub fn origin_degrees(&self) -> (f64, f64) {
        (self.lat as f64 / GRID_SCALE, self.lon as f64 / GRID_SCALE)
    }
}

pub fn decode(key: &[u8]) -> Result<GridCell, ExportError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| ExportError::InvalidGrid { len: key.len() })?;
    let lat = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64 - LAT_OFFSET;
    let lon = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as i64 - LON_OFFSET;
    let out_of_range = |_| ExportError::GridOutOfRange { lat, lon };
    Ok(GridCell {
        lat: i32::try_from(lat).map_err(out_of_range)?,
        lon: i32::try_from(lon).map_err(out_of_range)?,
    })
}

pub fn encode(cell: GridCell) -> [u8; 8] {
    let lat = (cell.lat as i64 + LAT_OFFSET) as u32;
    let lon = (cell.lon as i64 + LON_OFFSET) as u32;
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&lat.to_be_bytes());
    key[4..].copy_from_slice(&lon.to_be_bytes());
    key
}
