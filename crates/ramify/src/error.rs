//! Error types shared by the store and the spawner.
//!
//! Admission errors (`DepthExceeded`, `BudgetExhausted`, `UnknownParent`)
//! are returned synchronously to the caller of `spawn`/`decompose` before any
//! state is touched. Execution failures inside a spawned agent are *not*
//! errors at this level — they are converted into stored error-shaped
//! results so one failing branch of a fan-out never aborts its siblings.

use thiserror::Error;

/// Result type alias for ramify operations.
pub type Result<T> = std::result::Result<T, RamifyError>;

/// Error type covering admission, storage, and merge failures.
#[derive(Error, Debug)]
pub enum RamifyError {
    /// Spawn requested at or beyond the configured depth limit.
    #[error("spawn depth {depth} exceeds the configured maximum of {max}")]
    DepthExceeded { depth: u32, max: u32 },

    /// Cumulative token usage has reached the configured budget.
    #[error("token budget exhausted: {used} of {budget} tokens used")]
    BudgetExhausted { used: u64, budget: u64 },

    /// Spawn named a parent that is not in the forest.
    #[error("unknown parent spawn '{0}'")]
    UnknownParent(String),

    /// Lookup of a variable that is in neither the catalog nor on disk.
    #[error("no variable named '{0}'")]
    NotFound(String),

    /// The external runtime refused to register an agent.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A custom merge reducer failed.
    #[error("merge failed: {0}")]
    Merge(String),

    /// I/O errors from spillover and persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
