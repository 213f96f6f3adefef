#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![doc = include_str!("../README.md")]

mod error;
pub use error::ViewError;

pub mod sharded_map;
pub use sharded_map::ShardedMap;

pub mod snapshot_map;
pub use snapshot_map::{SnapshotMap, SnapshotMapBase, SuspendingSnapshotMap};

mod table;
pub use table::ConcurrentTable;

mod sync;
mod wait_queue;

#[cfg(feature = "serde")]
mod serde;

#[cfg(test)]
mod tests;
