//! # datamap-sync
//!
//! Content-addressed sync of the local tile pyramid to an object store, and
//! the [`Pipeline`] that runs every stage of a datamap build.
//!
//! - [`store`]: the [`ObjectStore`] seam, with S3 and in-memory stores
//! - [`inventory`] and [`plan`]: diff local tiles against the remote listing
//! - [`execute`]: run a [`SyncPlan`] on a recycling worker pool
//! - [`status`]: the `data.json` run record
//! - [`pipeline`]: export, index, render and sync in sequence

pub mod error;
pub mod execute;
pub mod hash;
pub mod inventory;
pub mod pipeline;
pub mod plan;
pub mod status;
pub mod store;

pub use error::{PipelineError, StoreError, SyncError};
pub use execute::{sync_tiles, SyncSettings};
pub use hash::{md5_hex, ContentHasher, Md5Hasher};
pub use inventory::{fetch_inventory, Inventory, RemoteObject};
pub use pipeline::{Phases, Pipeline, WorkDirs};
pub use plan::{compute_plan, SyncPlan};
pub use status::{upload_status_file, STATUS_FILE};
pub use store::{
    check_bucket, MemoryStore, ObjectMeta, ObjectStore, S3Store, S3StoreFactory, StoreFactory,
    StoreSlot,
};
