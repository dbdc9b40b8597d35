//! Common imports for embedders.
//!
//! ```ignore
//! use ramify::prelude::*;
//! ```

pub use crate::error::{RamifyError, Result};
pub use crate::spawner::{
    DecomposeRequest, MergeStrategy, RecursiveSpawner, SpawnRecord, SpawnRequest, SpawnStatus,
    SpawnTreeNode, SpawnerConfig, SpawnerStats,
};
pub use crate::store::{
    ContextStore, ListFilter, Payload, SetOptions, StoreConfig, VarRef, VarScope, VarType,
};
pub use crate::{AgentOutcome, AgentRuntime, AgentSpec, FnRuntime, ResourceUsage};
