//! Variable metadata: types, scopes, payload placement, and the `VarRef`
//! handle that circulates between agents instead of the data itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

// ── Types and scopes ───────────────────────────────────────────────

/// Declared or inferred shape of a variable's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    /// A plain string value.
    Text,
    /// Arbitrary structured JSON.
    Json,
    /// An agent's stored output (success or error-shaped).
    Result,
}

impl VarType {
    /// Infer a type from a value's shape. Objects carrying a `result` or
    /// `output` key are treated as agent results.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::String(_) => VarType::Text,
            Value::Object(map) if map.contains_key("result") || map.contains_key("output") => {
                VarType::Result
            }
            _ => VarType::Json,
        }
    }
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarType::Text => write!(f, "text"),
            VarType::Json => write!(f, "json"),
            VarType::Result => write!(f, "result"),
        }
    }
}

/// Visibility scope of a variable.
///
/// Scope is a labeling and filtering mechanism, not an access control
/// boundary: any holder of a key or ref can resolve the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarScope {
    /// Visible across the whole forest.
    Global,
    /// Associated with one spawned agent.
    Agent(String),
}

impl std::fmt::Display for VarScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarScope::Global => write!(f, "global"),
            VarScope::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

// ── Payload placement ──────────────────────────────────────────────

/// Where a variable's value currently lives.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Held in memory, counted against the store's ceiling.
    Resident(Value),
    /// Spilled to a file; only the path is held in memory.
    Spilled(PathBuf),
}

impl Payload {
    /// True when the value has been moved out to disk.
    pub fn is_spilled(&self) -> bool {
        matches!(self, Payload::Spilled(_))
    }
}

// ── VarRef ─────────────────────────────────────────────────────────

/// Constant-size handle to a stored variable.
///
/// A `VarRef` is metadata only; it never embeds the payload, so handing
/// one to a sub-agent costs a few dozen bytes regardless of how large the
/// underlying value is. Refs stay valid across spillover because they
/// resolve by key, not by location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRef {
    /// Unique ref identifier, fresh per issuance.
    pub id: String,
    /// Catalog key the ref resolves through.
    pub key: String,
    /// Scope the variable was stored under.
    pub scope: VarScope,
    /// Declared or inferred type.
    pub var_type: VarType,
    /// Serialized size of the value in bytes.
    pub bytes: usize,
    /// When the variable was stored.
    pub created_at: DateTime<Utc>,
}

/// A catalog entry: payload placement plus the metadata refs are minted from.
#[derive(Debug, Clone)]
pub(crate) struct Variable {
    pub key: String,
    pub payload: Payload,
    pub bytes: usize,
    pub var_type: VarType,
    pub scope: VarScope,
    pub created_at: DateTime<Utc>,
    /// Set when the value also exists as a file (persisted or spilled).
    pub persisted: bool,
    /// Cached summary, keyed by the token limit it was rendered at.
    pub summary: Option<(usize, String)>,
}
