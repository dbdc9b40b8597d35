//! Fan-out and fan-in of delegated agent work.
//!
//! [`RecursiveSpawner`] admits spawns through depth, budget, and
//! concurrency gates, tracks them in a forest, and stores every result in
//! the shared [`ContextStore`](crate::store::ContextStore). [`MergeStrategy`]
//! covers the fan-in side; [`DecomposeRequest`] bundles split-map-merge
//! over one large variable.

mod merge;
mod record;
mod spawn;

pub use spawn::{DecomposeRequest, RecursiveSpawner, SpawnRequest, SpawnerConfig};
pub use merge::{CONCAT_SEPARATOR, MergeFuture, MergeReducer, MergeStrategy};
pub use record::{SpawnRecord, SpawnStatus, SpawnTreeNode, SpawnerStats};
