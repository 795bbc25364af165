//! Shard export: page rows out of the data source, jitter each grid cell
//! into point lines, and write size-bounded CSV segments per shard.
//!
//! - [`source`]: the [`RowSource`] trait and an in-memory source
//! - [`sql`]: the MySQL source over `datamap_<shard>` tables
//! - [`grid`]: packed grid key decoding
//! - [`jitter`]: row → point line expansion
//! - [`writer`]: one shard into rotated segments
//! - [`stage`]: every shard on a worker pool

pub mod error;
pub mod grid;
pub mod jitter;
pub mod source;
pub mod sql;
pub mod stage;
pub mod writer;

pub use error::{ExportError, SourceError};
pub use grid::GridCell;
pub use jitter::{AgeJitter, CellOrigin, Jitter};
pub use source::{MemorySource, PointRow, RowSource};
pub use sql::SqlRowSource;
pub use stage::{export_to_csvs, ExportTotals};
pub use writer::{export_shard, ExportLimits, ShardExport};
