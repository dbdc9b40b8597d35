//! The `RecursiveSpawner`: admission-gated execution of agent forests.
//!
//! Every spawn passes three gates in order: the depth gate (synchronous
//! reject), the budget gate (synchronous reject), and the concurrency gate
//! (asynchronous wait for a slot). Rejections leave no trace; admitted
//! spawns are tracked in the forest until `reset`.

use crate::error::{RamifyError, Result};
use crate::spawner::merge::{self, MergeStrategy};
use crate::spawner::record::{SpawnRecord, SpawnStatus, SpawnTreeNode, SpawnerStats, build_tree};
use crate::store::{ContextStore, SetOptions, VarRef, VarScope, VarType};
use crate::{AgentRuntime, AgentSpec};
use futures::future::join_all;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

// ── Configuration and requests ─────────────────────────────────────

/// Limits applied to every spawn.
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    /// Depths `0..max_depth` are admitted.
    pub max_depth: u32,
    /// Number of concurrently executing spawns.
    pub max_concurrent: usize,
    /// Cumulative token ceiling across the forest. `None` means unlimited.
    pub token_budget: Option<u64>,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_concurrent: 5,
            token_budget: None,
        }
    }
}

impl SpawnerConfig {
    /// Create a config with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recursion depth limit.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the concurrency slot count.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the cumulative token budget.
    pub fn with_token_budget(mut self, budget: u64) -> Self {
        self.token_budget = Some(budget);
        self
    }
}

/// One unit of work to delegate.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Task prompt for the agent.
    pub prompt: String,
    /// Named context variables, handed over by file pointer.
    pub context: Vec<(String, VarRef)>,
    /// Optional model override.
    pub model: Option<String>,
    /// Abandon the wait for this run after the given duration.
    pub timeout: Option<Duration>,
    /// Optional iteration cap override.
    pub max_iterations: Option<u32>,
}

impl SpawnRequest {
    /// Create a request with just a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
            model: None,
            timeout: None,
            max_iterations: None,
        }
    }

    /// Attach a named context variable.
    pub fn with_context(mut self, name: impl Into<String>, var_ref: VarRef) -> Self {
        self.context.push((name.into(), var_ref));
        self
    }

    /// Override the model for this run.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set a wait timeout for this run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the iteration cap for this run.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

/// Split-map-merge request for [`RecursiveSpawner::decompose`].
#[derive(Debug, Clone)]
pub struct DecomposeRequest {
    /// Key of the stored variable to split.
    pub source_key: String,
    /// Number of chunks to split into.
    pub chunks: usize,
    /// Prompt applied to every chunk.
    pub prompt: String,
    /// How the per-chunk results are combined.
    pub strategy: MergeStrategy,
    /// Optional model override for the chunk workers.
    pub model: Option<String>,
    /// Optional per-worker wait timeout.
    pub timeout: Option<Duration>,
}

impl DecomposeRequest {
    /// Create a decompose request with the concatenate merge strategy.
    pub fn new(source_key: impl Into<String>, chunks: usize, prompt: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            chunks,
            prompt: prompt.into(),
            strategy: MergeStrategy::Concatenate,
            model: None,
            timeout: None,
        }
    }

    /// Set the merge strategy for the fan-in.
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the model for the chunk workers.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set a wait timeout per chunk worker.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ── Spawner ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Forest {
    records: HashMap<String, SpawnRecord>,
    root: Option<String>,
}

/// Admission-gated executor of agent forests.
///
/// Generic over the [`AgentRuntime`] that performs the actual work. All
/// methods take `&self`; share the spawner behind an `Arc` to spawn from
/// several tasks.
pub struct RecursiveSpawner<R: AgentRuntime> {
    runtime: Arc<R>,
    store: Arc<ContextStore>,
    config: SpawnerConfig,
    forest: Mutex<Forest>,
    slots: Arc<Semaphore>,
    total_tokens: AtomicU64,
    next_id: AtomicU64,
    merge_seq: AtomicU64,
}

impl<R: AgentRuntime> RecursiveSpawner<R> {
    /// Create a spawner over a runtime and a shared context store.
    pub fn new(runtime: Arc<R>, store: Arc<ContextStore>, config: SpawnerConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            runtime,
            store,
            config,
            forest: Mutex::new(Forest::default()),
            slots,
            total_tokens: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            merge_seq: AtomicU64::new(1),
        }
    }

    /// The store results and context flow through.
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Delegate one unit of work and wait for its result.
    ///
    /// `depth` is the recursion depth the spawn executes at; callers inside
    /// an agent pass their own depth plus one. Returns a ref to the stored
    /// result. The agent's own failure (including a timeout) is stored as
    /// an error-shaped result and still returns `Ok`; only admission
    /// failures return `Err`, and those leave no trace in the forest or
    /// the store.
    pub async fn spawn(
        &self,
        request: SpawnRequest,
        parent: Option<&str>,
        depth: u32,
    ) -> Result<VarRef> {
        // Depth gate.
        if depth >= self.config.max_depth {
            return Err(RamifyError::DepthExceeded {
                depth,
                max: self.config.max_depth,
            });
        }

        // Budget gate. A spawn admitted one token under budget may still
        // run; overshoot is bounded by one run per slot.
        if let Some(budget) = self.config.token_budget {
            let used = self.total_tokens.load(Ordering::Relaxed);
            if used >= budget {
                return Err(RamifyError::BudgetExhausted { used, budget });
            }
        }

        // Concurrency gate. The permit is held until this spawn finishes.
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|e| RamifyError::Runtime(e.to_string()))?;

        // Register in the forest.
        let id = {
            let mut forest = self.forest.lock().unwrap();
            if let Some(p) = parent
                && !forest.records.contains_key(p)
            {
                return Err(RamifyError::UnknownParent(p.to_string()));
            }
            let id = format!("agent-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            forest.records.insert(
                id.clone(),
                SpawnRecord::new(id.clone(), parent.map(String::from), depth),
            );
            match parent {
                Some(p) => {
                    if let Some(rec) = forest.records.get_mut(p) {
                        rec.children.push(id.clone());
                    }
                }
                None => {
                    if forest.root.is_none() {
                        forest.root = Some(id.clone());
                    }
                }
            }
            id
        };
        debug!(id = %id, depth, parent = ?parent, "spawn admitted");

        // Hand context over by file pointer, not by value.
        let prompt = self.compose_prompt(&id, &request)?;

        let spec = AgentSpec {
            prompt,
            model: request.model.clone(),
            max_iterations: request.max_iterations,
        };

        let run_result = match self.runtime.create(spec) {
            Ok(handle) => match request.timeout {
                Some(dur) => match tokio::time::timeout(dur, self.runtime.run(handle)).await {
                    Ok(result) => result,
                    Err(_) => Err(format!("timed out after {dur:?}")),
                },
                None => self.runtime.run(handle).await,
            },
            Err(e) => Err(e.to_string()),
        };

        let result_key = format!("{id}.result");
        let scope = match parent {
            Some(p) => VarScope::Agent(p.to_string()),
            None => VarScope::Global,
        };
        let opts = SetOptions::new()
            .with_scope(scope)
            .with_type(VarType::Result);

        match run_result {
            Ok(outcome) => {
                let tokens = outcome.usage.total();
                let var_ref = self.store.set(&result_key, outcome.value, opts)?;
                self.total_tokens.fetch_add(tokens, Ordering::Relaxed);
                let mut forest = self.forest.lock().unwrap();
                if let Some(rec) = forest.records.get_mut(&id) {
                    rec.status = SpawnStatus::Completed;
                    rec.usage = outcome.usage;
                    rec.result = Some(var_ref.clone());
                }
                debug!(id = %id, tokens, "spawn completed");
                Ok(var_ref)
            }
            Err(message) => {
                warn!(id = %id, error = %message, "spawn failed");
                let var_ref = self
                    .store
                    .set(&result_key, json!({"error": message, "agent_id": id}), opts)?;
                let mut forest = self.forest.lock().unwrap();
                if let Some(rec) = forest.records.get_mut(&id) {
                    rec.status = SpawnStatus::Failed;
                    rec.result = Some(var_ref.clone());
                }
                Ok(var_ref)
            }
        }
    }

    /// Delegate several units of work as siblings and wait for all of
    /// them. Individual failures come back as error-shaped results; an
    /// admission failure on any sibling fails the whole call.
    ///
    /// Siblings that were admitted still run to completion before the
    /// call returns, and their results remain in the store and the
    /// forest. After an admission `Err`, recover them through
    /// [`record`](Self::record) / [`stats`](Self::stats) and the store's
    /// `{id}.result` keys.
    pub async fn spawn_many(
        &self,
        requests: Vec<SpawnRequest>,
        parent: Option<&str>,
        depth: u32,
    ) -> Result<Vec<VarRef>> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.spawn(request, parent, depth)),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Combine several stored results into a new stored variable.
    pub async fn merge(&self, inputs: &[VarRef], strategy: MergeStrategy) -> Result<VarRef> {
        let mut resolved = Vec::with_capacity(inputs.len());
        for input in inputs {
            let current = self.store.ref_to(&input.key)?;
            let value = self.store.resolve(input)?;
            resolved.push((input.key.clone(), current.var_type, value));
        }

        let merged = match strategy {
            MergeStrategy::Concatenate => {
                let values: Vec<Value> = resolved.iter().map(|(_, _, v)| v.clone()).collect();
                merge::concatenate(&values)
            }
            MergeStrategy::Structured => {
                let pairs: Vec<(String, Value)> = resolved
                    .iter()
                    .map(|(k, _, v)| (k.clone(), v.clone()))
                    .collect();
                merge::structured(&pairs)
            }
            MergeStrategy::Vote => {
                let values: Vec<Value> = resolved.iter().map(|(_, _, v)| v.clone()).collect();
                merge::vote(&values)
            }
            MergeStrategy::Summarize => merge::summarize(&resolved),
            MergeStrategy::Custom(reducer) => {
                let values: Vec<Value> = resolved.into_iter().map(|(_, _, v)| v).collect();
                reducer(values).await.map_err(RamifyError::Merge)?
            }
        };

        let key = format!("merge.{}", self.merge_seq.fetch_add(1, Ordering::Relaxed));
        debug!(key = %key, inputs = inputs.len(), "merged results");
        self.store
            .set(&key, merged, SetOptions::new().with_type(VarType::Result))
    }

    /// Split a stored variable into character chunks, run one sibling
    /// spawn per chunk, and merge the results.
    pub async fn decompose(&self, request: DecomposeRequest) -> Result<VarRef> {
        let value = self.store.get(&request.source_key)?;
        let text = merge::stringify(&value);
        let pieces = chunk_chars(&text, request.chunks);
        let count = pieces.len();

        let mut spawns = Vec::with_capacity(count);
        for (i, piece) in pieces.into_iter().enumerate() {
            let chunk_key = format!("{}.chunk_{i}", request.source_key);
            let chunk_ref = self.store.set(
                &chunk_key,
                Value::String(piece),
                SetOptions::new().with_type(VarType::Text),
            )?;

            let mut spawn = SpawnRequest::new(format!(
                "{}\n\nYou are handling piece {} of {}.",
                request.prompt,
                i + 1,
                count
            ))
            .with_context("chunk", chunk_ref);
            if let Some(model) = &request.model {
                spawn = spawn.with_model(model.clone());
            }
            if let Some(timeout) = request.timeout {
                spawn = spawn.with_timeout(timeout);
            }
            spawns.push(spawn);
        }

        let refs = self.spawn_many(spawns, None, 0).await?;
        self.merge(&refs, request.strategy).await
    }

    // ── Introspection ──────────────────────────────────────────────

    /// The tree rooted at the first parentless spawn, if any.
    pub fn tree(&self) -> Option<SpawnTreeNode> {
        let forest = self.forest.lock().unwrap();
        let root = forest.root.as_deref()?;
        build_tree(&forest.records, root)
    }

    /// A copy of one spawn's record.
    pub fn record(&self, id: &str) -> Option<SpawnRecord> {
        self.forest.lock().unwrap().records.get(id).cloned()
    }

    /// Cumulative tokens consumed by finished spawns.
    pub fn total_usage(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    /// Number of spawns currently holding a concurrency slot.
    pub fn active_count(&self) -> usize {
        self.config.max_concurrent - self.slots.available_permits()
    }

    /// Aggregate counters over the forest.
    pub fn stats(&self) -> SpawnerStats {
        let forest = self.forest.lock().unwrap();
        let mut stats = SpawnerStats {
            total: forest.records.len(),
            total_tokens: self.total_usage(),
            ..Default::default()
        };
        for record in forest.records.values() {
            match record.status {
                SpawnStatus::Running => stats.running += 1,
                SpawnStatus::Completed => stats.completed += 1,
                SpawnStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Forget the forest and the token count. Stored variables are left
    /// in the context store.
    pub fn reset(&self) {
        let mut forest = self.forest.lock().unwrap();
        forest.records.clear();
        forest.root = None;
        self.total_tokens.store(0, Ordering::Relaxed);
    }

    /// Persist each context variable, store a manifest for the spawn, and
    /// append a pointer section to the prompt.
    fn compose_prompt(&self, id: &str, request: &SpawnRequest) -> Result<String> {
        let mut prompt = request.prompt.clone();
        if request.context.is_empty() {
            return Ok(prompt);
        }

        let mut manifest = serde_json::Map::new();
        prompt.push_str("\n\n## Context files\n");
        for (name, var_ref) in &request.context {
            let entry = match self.store.persist_for_sub_agent(&var_ref.key) {
                Ok(path) => {
                    let current = self.store.ref_to(&var_ref.key)?;
                    json!({
                        "path": path,
                        "bytes": current.bytes,
                        "type": current.var_type,
                    })
                }
                Err(e) => {
                    warn!(key = %var_ref.key, error = %e, "context variable unavailable");
                    json!({"path": "unavailable", "bytes": 0, "type": var_ref.var_type})
                }
            };
            prompt.push_str(&format!(
                "- {name}: {} ({} bytes, {})\n",
                entry["path"].as_str().unwrap_or("unavailable"),
                entry["bytes"],
                var_ref.var_type,
            ));
            manifest.insert(name.clone(), entry);
        }

        self.store.set(
            format!("{id}.context_manifest"),
            Value::Object(manifest),
            SetOptions::new()
                .with_scope(VarScope::Agent(id.to_string()))
                .with_type(VarType::Json),
        )?;
        Ok(prompt)
    }
}

impl<R: AgentRuntime> std::fmt::Debug for RecursiveSpawner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveSpawner")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .field("total_tokens", &self.total_usage())
            .finish_non_exhaustive()
    }
}

/// Split text into `n` chunks of whole characters, the last possibly
/// shorter. Chunk sizes are `ceil(len / n)`.
fn chunk_chars(text: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = n.max(1);
    let size = chars.len().div_ceil(n).max(1);
    let mut pieces: Vec<String> = chars.chunks(size).map(|c| c.iter().collect()).collect();
    // Counts beyond the content length pad out with empty pieces.
    pieces.resize(n, String::new());
    pieces
}
