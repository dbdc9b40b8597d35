//! The `ContextStore`: a keyed catalog of typed variables with memory
//! accounting, disk spillover, persistence, and cached summaries.
//!
//! All data produced by spawned agents flows through here. Callers hold
//! [`VarRef`] handles and only materialize payloads when they resolve them,
//! so a forest of agents can accumulate far more intermediate data than
//! would fit in any single context window.

use crate::error::{RamifyError, Result};
use crate::store::variable::{Payload, VarRef, VarScope, VarType, Variable};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Characters-per-token ratio used when rendering summaries.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default in-memory ceiling before values spill to disk (4 MiB).
pub const DEFAULT_MEMORY_CEILING: usize = 4 * 1024 * 1024;

// ── Configuration ──────────────────────────────────────────────────

/// Configuration for a [`ContextStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Total serialized bytes allowed to stay resident in memory.
    pub memory_ceiling_bytes: usize,
    /// Directory for spilled and persisted variable files.
    pub storage_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING,
            storage_dir: std::env::temp_dir().join("ramify-context"),
        }
    }
}

impl StoreConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resident-memory ceiling in bytes.
    pub fn with_memory_ceiling(mut self, bytes: usize) -> Self {
        self.memory_ceiling_bytes = bytes;
        self
    }

    /// Set the directory for spilled and persisted variables.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }
}

/// Options for [`ContextStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Scope to store under. Defaults to [`VarScope::Global`].
    pub scope: Option<VarScope>,
    /// Also write the value to disk so it survives a restart.
    pub persist: bool,
    /// Explicit type; inferred from the value's shape when absent.
    pub var_type: Option<VarType>,
}

impl SetOptions {
    /// Create default options (global scope, no persistence, inferred type).
    pub fn new() -> Self {
        Self::default()
    }

    /// Store under the given scope.
    pub fn with_scope(mut self, scope: VarScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Write the value to disk in addition to keeping it resident.
    pub fn persisted(mut self) -> Self {
        self.persist = true;
        self
    }

    /// Declare the variable's type explicitly.
    pub fn with_type(mut self, var_type: VarType) -> Self {
        self.var_type = Some(var_type);
        self
    }
}

/// Filter for [`ContextStore::list`]. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub scope: Option<VarScope>,
    pub var_type: Option<VarType>,
    pub key_prefix: Option<String>,
}

impl ListFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match only variables in the given scope.
    pub fn with_scope(mut self, scope: VarScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Match only variables of the given type.
    pub fn with_type(mut self, var_type: VarType) -> Self {
        self.var_type = Some(var_type);
        self
    }

    /// Match only keys starting with the given prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

// ── On-disk format ─────────────────────────────────────────────────

/// Serialized form of a variable on disk.
#[derive(Debug, Serialize, Deserialize)]
struct VarFile {
    #[serde(rename = "ref")]
    var_ref: VarRef,
    value: Value,
    persist: bool,
}

// ── ContextStore ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CatalogInner {
    vars: HashMap<String, Variable>,
    resident_bytes: usize,
    next_ref_id: u64,
}

/// Keyed catalog of variables with a memory ceiling and disk spillover.
///
/// Thread-safe; share it behind an `Arc`. Writes that would push resident
/// bytes past the ceiling land the incoming value on disk instead, and
/// refs keep resolving transparently either way.
#[derive(Debug)]
pub struct ContextStore {
    config: StoreConfig,
    inner: Mutex<CatalogInner>,
}

impl ContextStore {
    /// Create a store with an empty catalog, creating the storage directory.
    pub fn new(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.storage_dir)?;
        Ok(Self {
            config,
            inner: Mutex::new(CatalogInner {
                next_ref_id: 1,
                ..Default::default()
            }),
        })
    }

    /// Create a store and reload persisted variables from the storage
    /// directory. Reloaded values stay on disk until resolved; malformed
    /// files are skipped with a warning.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = Self::new(config)?;
        let mut inner = store.inner.lock().unwrap();

        for entry in fs::read_dir(&store.config.storage_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file: VarFile = match fs::read_to_string(&path)
                .map_err(RamifyError::from)
                .and_then(|s| serde_json::from_str(&s).map_err(RamifyError::from))
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed variable file");
                    continue;
                }
            };
            if !file.persist {
                debug!(key = %file.var_ref.key, "skipping stale spillover file");
                continue;
            }

            // Keep ref ids monotonic across restarts.
            if let Some(n) = file
                .var_ref
                .id
                .strip_prefix("var-")
                .and_then(|n| n.parse::<u64>().ok())
            {
                inner.next_ref_id = inner.next_ref_id.max(n + 1);
            }

            let key = file.var_ref.key.clone();
            inner.vars.insert(
                key.clone(),
                Variable {
                    key,
                    payload: Payload::Spilled(path),
                    bytes: file.var_ref.bytes,
                    var_type: file.var_ref.var_type,
                    scope: file.var_ref.scope,
                    created_at: file.var_ref.created_at,
                    persisted: true,
                    summary: None,
                },
            );
        }

        debug!(loaded = inner.vars.len(), "context store opened");
        drop(inner);
        Ok(store)
    }

    /// Store a value under a key, replacing any previous value.
    ///
    /// Returns a [`VarRef`] handle. If keeping the value resident would
    /// exceed the memory ceiling, the value is written to disk and only
    /// the path stays in memory.
    pub fn set(&self, key: impl Into<String>, value: Value, opts: SetOptions) -> Result<VarRef> {
        let key = key.into();
        let bytes = serde_json::to_vec(&value)?.len();
        let var_type = opts.var_type.unwrap_or_else(|| VarType::infer(&value));
        let scope = opts.scope.unwrap_or(VarScope::Global);

        let mut inner = self.inner.lock().unwrap();

        // Replacing an entry frees its resident accounting first.
        let old_had_file = match inner.vars.remove(&key) {
            Some(old) => {
                if let Payload::Resident(_) = old.payload {
                    inner.resident_bytes = inner.resident_bytes.saturating_sub(old.bytes);
                }
                old.persisted
            }
            None => false,
        };

        let var_ref = VarRef {
            id: format!("var-{}", inner.next_ref_id),
            key: key.clone(),
            scope: scope.clone(),
            var_type,
            bytes,
            created_at: Utc::now(),
        };
        inner.next_ref_id += 1;

        let would_exceed = inner.resident_bytes + bytes > self.config.memory_ceiling_bytes;
        let (payload, persisted) = if would_exceed {
            let path = self.write_var_file(&var_ref, &value, opts.persist)?;
            debug!(key = %key, bytes, "value spilled to disk");
            (Payload::Spilled(path), true)
        } else {
            if opts.persist {
                self.write_var_file(&var_ref, &value, true)?;
            }
            inner.resident_bytes += bytes;
            (Payload::Resident(value), opts.persist)
        };

        // The replaced value's file must not outlive it; a stale file would
        // resurrect through the disk fallback or a later `open`.
        if old_had_file && !persisted {
            let stale = self.file_path(&key);
            if let Err(e) = fs::remove_file(&stale) {
                warn!(path = %stale.display(), error = %e, "failed to remove replaced variable file");
            }
        }

        inner.vars.insert(
            key.clone(),
            Variable {
                key,
                payload,
                bytes,
                var_type,
                scope,
                created_at: var_ref.created_at,
                persisted,
                summary: None,
            },
        );

        Ok(var_ref)
    }

    /// Materialize the value stored under a key.
    ///
    /// Resident values are cloned; spilled values are read back from disk.
    /// Falls back to the storage directory for keys that are on disk but
    /// not in the catalog (e.g. written by an earlier process).
    pub fn get(&self, key: &str) -> Result<Value> {
        let spilled_path = {
            let inner = self.inner.lock().unwrap();
            match inner.vars.get(key) {
                Some(var) => match &var.payload {
                    Payload::Resident(value) => return Ok(value.clone()),
                    Payload::Spilled(path) => path.clone(),
                },
                None => self.file_path(key),
            }
        };

        match fs::read_to_string(&spilled_path) {
            Ok(text) => {
                let file: VarFile = serde_json::from_str(&text)?;
                Ok(file.value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RamifyError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mint a fresh ref to an existing variable without touching its
    /// payload. O(1) regardless of value size or placement.
    pub fn ref_to(&self, key: &str) -> Result<VarRef> {
        let mut inner = self.inner.lock().unwrap();
        let id = format!("var-{}", inner.next_ref_id);
        let var = inner
            .vars
            .get(key)
            .ok_or_else(|| RamifyError::NotFound(key.to_string()))?;
        let var_ref = VarRef {
            id,
            key: var.key.clone(),
            scope: var.scope.clone(),
            var_type: var.var_type,
            bytes: var.bytes,
            created_at: var.created_at,
        };
        inner.next_ref_id += 1;
        Ok(var_ref)
    }

    /// Materialize the value a ref points at.
    pub fn resolve(&self, var_ref: &VarRef) -> Result<Value> {
        self.get(&var_ref.key)
    }

    /// Remove a variable. Returns whether it existed; removing a missing
    /// key is not an error. The on-disk file, if any, is removed
    /// best-effort.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(var) = inner.vars.remove(key) else {
            return false;
        };
        if let Payload::Resident(_) = var.payload {
            inner.resident_bytes = inner.resident_bytes.saturating_sub(var.bytes);
        }
        if var.persisted {
            let path = match var.payload {
                Payload::Spilled(p) => p,
                Payload::Resident(_) => self.file_path(key),
            };
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove variable file");
            }
        }
        true
    }

    /// Whether a variable exists in the catalog.
    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().unwrap().vars.contains_key(key)
    }

    /// Whether a variable's payload currently lives on disk.
    pub fn is_spilled(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .vars
            .get(key)
            .is_some_and(|v| v.payload.is_spilled())
    }

    /// List refs to all variables matching a filter, sorted by key.
    pub fn list(&self, filter: &ListFilter) -> Vec<VarRef> {
        let mut inner = self.inner.lock().unwrap();
        let mut keys: Vec<String> = inner
            .vars
            .values()
            .filter(|v| {
                filter.scope.as_ref().is_none_or(|s| &v.scope == s)
                    && filter.var_type.is_none_or(|t| v.var_type == t)
                    && filter
                        .key_prefix
                        .as_deref()
                        .is_none_or(|p| v.key.starts_with(p))
            })
            .map(|v| v.key.clone())
            .collect();
        keys.sort();

        keys.into_iter()
            .map(|key| {
                let id = format!("var-{}", inner.next_ref_id);
                inner.next_ref_id += 1;
                let var = &inner.vars[&key];
                VarRef {
                    id,
                    key: var.key.clone(),
                    scope: var.scope.clone(),
                    var_type: var.var_type,
                    bytes: var.bytes,
                    created_at: var.created_at,
                }
            })
            .collect()
    }

    /// Drop every catalog entry and reset resident accounting. Files on
    /// disk are left in place; `open` can recover persisted entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.vars.clear();
        inner.resident_bytes = 0;
    }

    /// Render a bounded textual summary of a variable, at most
    /// `max_tokens * 4` characters. Truncated renderings carry a footer
    /// naming the full size. The result is cached per token limit.
    pub fn summarize(&self, key: &str, max_tokens: usize) -> Result<String> {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(var) = inner.vars.get(key)
                && let Some((cached_limit, cached)) = &var.summary
                && *cached_limit == max_tokens
            {
                return Ok(cached.clone());
            }
            if !inner.vars.contains_key(key) {
                return Err(RamifyError::NotFound(key.to_string()));
            }
        }

        let value = self.get(key)?;
        let rendered = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let limit = max_tokens * CHARS_PER_TOKEN;
        let mut inner = self.inner.lock().unwrap();
        let var = inner
            .vars
            .get_mut(key)
            .ok_or_else(|| RamifyError::NotFound(key.to_string()))?;

        let summary = if rendered.chars().count() <= limit {
            rendered
        } else {
            let head: String = rendered.chars().take(limit).collect();
            format!(
                "{head}\n… [truncated: {} bytes total, type {}]",
                var.bytes, var.var_type
            )
        };
        var.summary = Some((max_tokens, summary.clone()));
        Ok(summary)
    }

    /// Ensure a variable exists as a file and return its path, for handing
    /// to a sub-agent by pointer. Spilled variables already have one;
    /// resident variables are written out and marked persisted.
    pub fn persist_for_sub_agent(&self, key: &str) -> Result<PathBuf> {
        let (var_ref, value) = {
            let mut inner = self.inner.lock().unwrap();
            let id = format!("var-{}", inner.next_ref_id);
            let var = inner
                .vars
                .get(key)
                .ok_or_else(|| RamifyError::NotFound(key.to_string()))?;
            match &var.payload {
                Payload::Spilled(path) => return Ok(path.clone()),
                Payload::Resident(value) => {
                    let pair = (
                        VarRef {
                            id,
                            key: var.key.clone(),
                            scope: var.scope.clone(),
                            var_type: var.var_type,
                            bytes: var.bytes,
                            created_at: var.created_at,
                        },
                        value.clone(),
                    );
                    inner.next_ref_id += 1;
                    pair
                }
            }
        };

        let path = self.write_var_file(&var_ref, &value, true)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(var) = inner.vars.get_mut(key) {
            var.persisted = true;
        }
        Ok(path)
    }

    /// Serialized bytes currently held in memory.
    pub fn resident_bytes(&self) -> usize {
        self.inner.lock().unwrap().resident_bytes
    }

    /// Directory spilled and persisted variables are written under.
    pub fn storage_dir(&self) -> &Path {
        &self.config.storage_dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.config
            .storage_dir
            .join(format!("{}.json", sanitize_key(key)))
    }

    /// Write a variable file atomically (temp file then rename).
    fn write_var_file(&self, var_ref: &VarRef, value: &Value, persist: bool) -> Result<PathBuf> {
        let path = self.file_path(&var_ref.key);
        let tmp = path.with_extension("json.tmp");
        let file = VarFile {
            var_ref: var_ref.clone(),
            value: value.clone(),
            persist,
        };
        fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

/// Map a variable key to a safe file stem. Keys may contain anything;
/// filenames keep alphanumerics, dots, dashes, and underscores.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> ContextStore {
        ContextStore::new(StoreConfig::new().with_storage_dir(dir)).unwrap()
    }

    #[test]
    fn set_get_roundtrip_with_inferred_types() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let r1 = store.set("note", json!("hello"), SetOptions::new()).unwrap();
        assert_eq!(r1.var_type, VarType::Text);
        assert_eq!(store.get("note").unwrap(), json!("hello"));

        let r2 = store
            .set("data", json!({"a": [1, 2]}), SetOptions::new())
            .unwrap();
        assert_eq!(r2.var_type, VarType::Json);

        let r3 = store
            .set("out", json!({"result": "ok"}), SetOptions::new())
            .unwrap();
        assert_eq!(r3.var_type, VarType::Result);
    }

    #[test]
    fn explicit_type_overrides_inference() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let r = store
            .set("x", json!("text"), SetOptions::new().with_type(VarType::Result))
            .unwrap();
        assert_eq!(r.var_type, VarType::Result);
    }

    #[test]
    fn replacing_a_key_frees_its_accounting() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store
            .set("k", json!("a".repeat(1000)), SetOptions::new())
            .unwrap();
        let before = store.resident_bytes();
        store.set("k", json!("b"), SetOptions::new()).unwrap();
        assert!(store.resident_bytes() < before);
    }

    #[test]
    fn large_values_spill_to_disk() {
        let dir = tempdir().unwrap();
        let store = ContextStore::new(
            StoreConfig::new()
                .with_storage_dir(dir.path())
                .with_memory_ceiling(100),
        )
        .unwrap();

        let big = "x".repeat(500);
        store.set("big", json!(big), SetOptions::new()).unwrap();

        assert!(store.is_spilled("big"));
        assert_eq!(store.resident_bytes(), 0);
        // Resolution is transparent to the caller.
        assert_eq!(store.get("big").unwrap(), json!(big));
    }

    #[test]
    fn refs_stay_small_and_valid_after_spillover() {
        let dir = tempdir().unwrap();
        let store = ContextStore::new(
            StoreConfig::new()
                .with_storage_dir(dir.path())
                .with_memory_ceiling(100),
        )
        .unwrap();

        let r = store
            .set("big", json!("y".repeat(10_000)), SetOptions::new())
            .unwrap();
        assert_eq!(r.bytes, 10_002); // quotes included

        let fresh = store.ref_to("big").unwrap();
        assert_ne!(fresh.id, r.id);
        assert_eq!(fresh.key, r.key);
        assert_eq!(store.resolve(&fresh).unwrap(), json!("y".repeat(10_000)));
    }

    #[test]
    fn persisted_variables_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store
                .set("keep", json!({"v": 1}), SetOptions::new().persisted())
                .unwrap();
            store.set("drop", json!("gone"), SetOptions::new()).unwrap();
        }

        let store =
            ContextStore::open(StoreConfig::new().with_storage_dir(dir.path())).unwrap();
        assert_eq!(store.get("keep").unwrap(), json!({"v": 1}));
        assert!(!store.has("drop"));
    }

    #[test]
    fn replacing_a_persisted_value_removes_its_stale_file() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store
                .set("k", json!("v1"), SetOptions::new().persisted())
                .unwrap();
            store.set("k", json!("v2"), SetOptions::new()).unwrap();

            assert!(!dir.path().join("k.json").exists());
            assert_eq!(store.get("k").unwrap(), json!("v2"));

            // The old value must not come back through the disk fallback.
            store.clear();
            assert!(matches!(store.get("k"), Err(RamifyError::NotFound(_))));
        }

        // Nor after a restart.
        let store =
            ContextStore::open(StoreConfig::new().with_storage_dir(dir.path())).unwrap();
        assert!(!store.has("k"));
        assert!(matches!(store.get("k"), Err(RamifyError::NotFound(_))));
    }

    #[test]
    fn replacing_a_persisted_value_with_a_persisted_one_keeps_the_latest() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store
                .set("k", json!("v1"), SetOptions::new().persisted())
                .unwrap();
            store
                .set("k", json!("v2"), SetOptions::new().persisted())
                .unwrap();
        }
        let store =
            ContextStore::open(StoreConfig::new().with_storage_dir(dir.path())).unwrap();
        assert_eq!(store.get("k").unwrap(), json!("v2"));
    }

    #[test]
    fn ref_to_never_touches_the_payload() {
        let dir = tempdir().unwrap();
        let store = ContextStore::new(
            StoreConfig::new()
                .with_storage_dir(dir.path())
                .with_memory_ceiling(100),
        )
        .unwrap();

        store
            .set("big", json!("x".repeat(10_000)), SetOptions::new())
            .unwrap();
        assert!(store.is_spilled("big"));

        // With the backing file gone, metadata lookups must still work;
        // only a value read can notice.
        fs::remove_file(dir.path().join("big.json")).unwrap();

        let r = store.ref_to("big").unwrap();
        assert_eq!(r.bytes, 10_002);
        assert!(store.get("big").is_err());
    }

    #[test]
    fn open_skips_malformed_files() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store
                .set("good", json!(1), SetOptions::new().persisted())
                .unwrap();
        }
        fs::write(dir.path().join("bad.json"), "not json at all").unwrap();

        let store =
            ContextStore::open(StoreConfig::new().with_storage_dir(dir.path())).unwrap();
        assert!(store.has("good"));
        assert!(!store.has("bad"));
    }

    #[test]
    fn delete_is_idempotent_and_removes_files() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .set("k", json!("v"), SetOptions::new().persisted())
            .unwrap();
        let path = dir.path().join("k.json");
        assert!(path.exists());

        assert!(store.delete("k"));
        assert!(!path.exists());
        assert!(!store.delete("k"));
        assert!(matches!(store.get("k"), Err(RamifyError::NotFound(_))));
    }

    #[test]
    fn list_filters_by_scope_type_and_prefix() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .set(
                "a.one",
                json!("t"),
                SetOptions::new().with_scope(VarScope::Agent("a1".into())),
            )
            .unwrap();
        store.set("a.two", json!({"j": 1}), SetOptions::new()).unwrap();
        store.set("b.one", json!("t"), SetOptions::new()).unwrap();

        let all = store.list(&ListFilter::new());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].key, "a.one"); // sorted

        let prefixed = store.list(&ListFilter::new().with_key_prefix("a."));
        assert_eq!(prefixed.len(), 2);

        let scoped = store.list(&ListFilter::new().with_scope(VarScope::Agent("a1".into())));
        assert_eq!(scoped.len(), 1);

        let typed = store.list(&ListFilter::new().with_type(VarType::Json));
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].key, "a.two");
    }

    #[test]
    fn clear_resets_catalog_but_leaves_files() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .set("k", json!("v"), SetOptions::new().persisted())
            .unwrap();
        store.clear();
        assert!(!store.has("k"));
        assert_eq!(store.resident_bytes(), 0);
        assert!(dir.path().join("k.json").exists());
    }

    #[test]
    fn summarize_truncates_and_caches() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .set("long", json!("z".repeat(1000)), SetOptions::new())
            .unwrap();

        let s = store.summarize("long", 10).unwrap();
        assert!(s.starts_with(&"z".repeat(40)));
        assert!(s.contains("[truncated:"));
        assert!(s.contains("type text"));

        // Second call hits the cache.
        assert_eq!(store.summarize("long", 10).unwrap(), s);

        // A different limit re-renders.
        let wider = store.summarize("long", 500).unwrap();
        assert_eq!(wider, "z".repeat(1000));
    }

    #[test]
    fn persist_for_sub_agent_returns_a_readable_path() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.set("ctx", json!({"n": 7}), SetOptions::new()).unwrap();

        let path = store.persist_for_sub_agent("ctx").unwrap();
        let file: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(file["value"], json!({"n": 7}));

        // Already-spilled variables reuse their file.
        assert_eq!(store.persist_for_sub_agent("ctx").unwrap(), path);
    }

    #[test]
    fn keys_with_odd_characters_get_safe_filenames() {
        assert_eq!(sanitize_key("a/b c:d"), "a_b_c_d");
        assert_eq!(sanitize_key("agent-1.result"), "agent-1.result");

        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .set("weird/key name", json!(1), SetOptions::new().persisted())
            .unwrap();
        assert!(dir.path().join("weird_key_name.json").exists());
    }
}
