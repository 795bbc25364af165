//! Spatial index build and tile rendering on top of the external codec
//! tools.
//!
//! - [`tools`]: the tool invocation contract
//! - [`index`]: CSV → shard artifacts → global artifact
//! - [`tiles`]: tile enumeration and the render | quantize pipe

pub mod error;
pub mod index;
pub mod tiles;
pub mod tools;

#[cfg(all(unix, any(test, feature = "testing")))]
pub mod testing;

pub use error::{RenderError, ToolError};
pub use index::{csv_to_quadtrees, merge_quadtrees, IndexCounts};
pub use tiles::{render_pass, render_tiles};
pub use tools::{Duplicates, RenderPass, TileJob, Toolchain};
