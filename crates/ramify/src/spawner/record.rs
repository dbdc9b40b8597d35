//! Forest bookkeeping: per-spawn records, the introspection tree, and
//! aggregate statistics.

use crate::ResourceUsage;
use crate::store::VarRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of one spawned agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnStatus {
    /// Admitted and executing (or waiting on a concurrency slot holder).
    Running,
    /// Finished with a stored result.
    Completed,
    /// Finished with an error-shaped stored result.
    Failed,
}

impl SpawnStatus {
    /// True once the spawn has a stored result, successful or not.
    pub fn is_finished(&self) -> bool {
        !matches!(self, SpawnStatus::Running)
    }
}

/// Bookkeeping entry for one spawn in the forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRecord {
    /// Spawner-assigned identifier ("agent-N").
    pub id: String,
    /// Parent spawn id, if any.
    pub parent: Option<String>,
    /// Depth at which this spawn was admitted.
    pub depth: u32,
    pub status: SpawnStatus,
    /// Tokens reported by the run, zero until it finishes.
    pub usage: ResourceUsage,
    /// Child spawn ids in admission order.
    pub children: Vec<String>,
    /// Ref to the stored result, present once finished.
    pub result: Option<VarRef>,
    pub started_at: DateTime<Utc>,
}

impl SpawnRecord {
    pub(crate) fn new(id: String, parent: Option<String>, depth: u32) -> Self {
        Self {
            id,
            parent,
            depth,
            status: SpawnStatus::Running,
            usage: ResourceUsage::default(),
            children: Vec::new(),
            result: None,
            started_at: Utc::now(),
        }
    }
}

/// One node of the introspection tree returned by
/// [`RecursiveSpawner::tree`](crate::spawner::RecursiveSpawner::tree).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnTreeNode {
    pub id: String,
    pub status: SpawnStatus,
    pub depth: u32,
    /// Total tokens this spawn consumed (not including descendants).
    pub tokens: u64,
    /// Key of the stored result, if finished.
    pub result_key: Option<String>,
    pub children: Vec<SpawnTreeNode>,
}

/// Aggregate counters over the whole forest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_tokens: u64,
}

/// Build the subtree rooted at `root` from the flat record map.
pub(crate) fn build_tree(records: &HashMap<String, SpawnRecord>, root: &str) -> Option<SpawnTreeNode> {
    let record = records.get(root)?;
    Some(SpawnTreeNode {
        id: record.id.clone(),
        status: record.status,
        depth: record.depth,
        tokens: record.usage.total(),
        result_key: record.result.as_ref().map(|r| r.key.clone()),
        children: record
            .children
            .iter()
            .filter_map(|c| build_tree(records, c))
            .collect(),
    })
}
