//! Recursive fan-out/fan-in agent orchestration.
//!
//! `ramify` runs arbitrarily large trees of delegated work units ("agents")
//! without overwhelming either the caller's memory or the downstream
//! provider's context window. The two core pieces:
//!
//! - [`RecursiveSpawner`](spawner::RecursiveSpawner) — admits, executes, and
//!   tracks a forest of agent invocations behind three gates: a recursion
//!   depth limit, a cumulative token budget, and a concurrency slot cap.
//!   Exposes `spawn`, `spawn_many`, `merge`, `decompose`, and forest
//!   introspection.
//! - [`ContextStore`](store::ContextStore) — a keyed catalog of typed, sized
//!   Variables reachable through small constant-size [`VarRef`](store::VarRef)
//!   handles, with memory accounting and disk spillover. Results and context
//!   move between agents by reference, never by value.
//!
//! The actual computation is delegated to an [`AgentRuntime`] — an opaque
//! contract the embedder implements. How that runtime talks to a model,
//! interprets tool calls, or performs work is none of this crate's business.
//!
//! # Getting started
//!
//! ```ignore
//! use ramify::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ramify::Result<()> {
//!     let store = Arc::new(ContextStore::open(StoreConfig::default())?);
//!     let runtime = Arc::new(FnRuntime::new(|spec: AgentSpec| async move {
//!         // ... hand spec.prompt to your execution provider ...
//!         Ok(AgentOutcome::new("a1", serde_json::json!("done")))
//!     }));
//!
//!     let spawner = RecursiveSpawner::new(runtime, store.clone(), SpawnerConfig::default());
//!
//!     let result = spawner
//!         .spawn(SpawnRequest::new("Summarize the report."), None, 0)
//!         .await?;
//!     println!("{}", store.resolve(&result)?);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`spawner`] | [`RecursiveSpawner`](spawner::RecursiveSpawner), admission gates, merge/decompose fan-in |
//! | [`store`] | [`ContextStore`](store::ContextStore) variable catalog with spillover and summaries |
//! | [`error`] | [`RamifyError`] and the crate [`Result`] alias |
//!
//! # Design principles
//!
//! 1. **References, not values.** Every operation that produces data stores
//!    it and returns a [`VarRef`](store::VarRef). Payloads are only ever
//!    materialized when a caller resolves them.
//! 2. **Admission before state.** Depth and budget gates reject before
//!    anything is registered; a rejected spawn leaves no trace.
//! 3. **Failure is data.** A sub-agent's own failure becomes an error-shaped
//!    stored result, never an `Err` that could abort its siblings.

pub mod error;
pub mod prelude;
pub mod spawner;
pub mod store;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

pub use error::{RamifyError, Result};

// ── Runtime contract ───────────────────────────────────────────────

/// Boxed future returned by [`AgentRuntime::run`].
///
/// Execution failures are plain strings here: the spawner converts them
/// into error-shaped stored results, so a structured error type would buy
/// implementers nothing but boilerplate.
pub type RunFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<AgentOutcome, String>> + Send + 'a>>;

/// Specification for a single agent run, composed by the spawner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// The full prompt, including any context-manifest pointer section.
    pub prompt: String,
    /// Optional per-run model override.
    pub model: Option<String>,
    /// Optional per-run iteration cap override.
    pub max_iterations: Option<u32>,
}

/// Opaque handle returned by [`AgentRuntime::create`] and consumed by
/// [`AgentRuntime::run`].
#[derive(Debug, Clone)]
pub struct AgentHandle {
    /// Runtime-assigned identifier.
    pub id: String,
    /// The spec this handle was registered with.
    pub spec: AgentSpec,
}

/// Token accounting reported by a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ResourceUsage {
    /// Create a usage record from prompt and completion token counts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens consumed.
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Accumulate another run's usage into this one.
    pub fn add(&mut self, other: &ResourceUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Result of one completed agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Runtime-side agent identifier.
    pub agent_id: String,
    /// The run's result value.
    pub value: serde_json::Value,
    /// Tokens consumed by the run.
    pub usage: ResourceUsage,
    /// Number of iterations the run took.
    pub iterations: u32,
}

impl AgentOutcome {
    /// Create an outcome with zero usage and a single iteration.
    pub fn new(agent_id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            agent_id: agent_id.into(),
            value,
            usage: ResourceUsage::default(),
            iterations: 1,
        }
    }

    /// Set the token usage (builder pattern).
    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = ResourceUsage::new(prompt_tokens, completion_tokens);
        self
    }

    /// Set the iteration count (builder pattern).
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Contract for the external execution provider.
///
/// The spawner treats this as an opaque async function: `create` registers
/// a unit of work synchronously, `run` executes it to completion. There is
/// no cancellation channel in the contract — when a spawn times out, the
/// spawner abandons its wait; whether the underlying work stops is up to
/// the implementation.
pub trait AgentRuntime: Send + Sync {
    /// Register a unit of work. Synchronous; must not block.
    fn create(&self, spec: AgentSpec) -> Result<AgentHandle>;

    /// Execute a registered unit of work to completion.
    fn run(&self, handle: AgentHandle) -> RunFuture<'_>;
}

// ── FnRuntime ──────────────────────────────────────────────────────

/// Type-erased async run handler for [`FnRuntime`].
type ErasedRunHandler = Box<
    dyn Fn(AgentHandle) -> Pin<Box<dyn Future<Output = std::result::Result<AgentOutcome, String>> + Send>>
        + Send
        + Sync,
>;

/// A closure-based [`AgentRuntime`] for tests and simple embedders.
///
/// Eliminates the boilerplate of defining a struct + `impl AgentRuntime`
/// when the execution logic is a pure async function of the spec. The
/// generic constructor performs type erasure so `FnRuntime` is a concrete,
/// dyn-compatible type.
///
/// # Example
///
/// ```ignore
/// let runtime = FnRuntime::new(|spec: AgentSpec| async move {
///     Ok(AgentOutcome::new("echo", serde_json::json!(spec.prompt))
///         .with_usage(10, 5))
/// });
/// ```
pub struct FnRuntime {
    handler: ErasedRunHandler,
    next_id: AtomicU64,
}

impl FnRuntime {
    /// Create a runtime from an async closure over the [`AgentSpec`].
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(AgentSpec) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<AgentOutcome, String>> + Send + 'static,
    {
        let erased = move |handle: AgentHandle| -> Pin<
            Box<dyn Future<Output = std::result::Result<AgentOutcome, String>> + Send>,
        > { Box::pin(handler(handle.spec)) };
        Self {
            handler: Box::new(erased),
            next_id: AtomicU64::new(1),
        }
    }
}

impl AgentRuntime for FnRuntime {
    fn create(&self, spec: AgentSpec) -> Result<AgentHandle> {
        let id = format!("run-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(AgentHandle { id, spec })
    }

    fn run(&self, handle: AgentHandle) -> RunFuture<'_> {
        (self.handler)(handle)
    }
}

impl std::fmt::Debug for FnRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRuntime").finish_non_exhaustive()
    }
}
