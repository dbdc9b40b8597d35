//! Fan-in: strategies for combining several stored results into one.
//!
//! The built-in strategies are pure functions over the resolved values;
//! `Custom` accepts an async reducer for anything else (including reducers
//! that call back into a model).

use crate::store::VarType;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by a custom merge reducer.
pub type MergeFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

/// Async reducer over resolved input values.
pub type MergeReducer = Arc<dyn Fn(Vec<Value>) -> MergeFuture + Send + Sync>;

/// Separator between sections in [`MergeStrategy::Concatenate`] output.
pub const CONCAT_SEPARATOR: &str = "\n\n---\n\n";

/// How [`RecursiveSpawner::merge`](crate::spawner::RecursiveSpawner::merge)
/// combines its inputs.
#[derive(Clone)]
pub enum MergeStrategy {
    /// Join textual renderings with a separator, in input order.
    Concatenate,
    /// Build one object keyed by input variable key. Duplicate keys are
    /// last-wins.
    Structured,
    /// Majority vote over serialized values; ties go to the first-seen
    /// candidate.
    Vote,
    /// A numbered digest naming each input's key and type.
    Summarize,
    /// Caller-supplied async reducer.
    Custom(MergeReducer),
}

impl std::fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Concatenate => write!(f, "Concatenate"),
            MergeStrategy::Structured => write!(f, "Structured"),
            MergeStrategy::Vote => write!(f, "Vote"),
            MergeStrategy::Summarize => write!(f, "Summarize"),
            MergeStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Render a value as text: strings verbatim, everything else as JSON.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn concatenate(values: &[Value]) -> Value {
    let joined = values
        .iter()
        .map(stringify)
        .collect::<Vec<_>>()
        .join(CONCAT_SEPARATOR);
    Value::String(joined)
}

pub(crate) fn structured(inputs: &[(String, Value)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in inputs {
        map.insert(key.clone(), value.clone());
    }
    Value::Object(map)
}

pub(crate) fn vote(values: &[Value]) -> Value {
    // Tally by serialized form; first-seen order breaks ties.
    let mut tally: Vec<(String, &Value, usize)> = Vec::new();
    for value in values {
        let rendered = stringify(value);
        match tally.iter_mut().find(|(r, _, _)| *r == rendered) {
            Some(entry) => entry.2 += 1,
            None => tally.push((rendered, value, 1)),
        }
    }

    let mut winner: Option<&(String, &Value, usize)> = None;
    for entry in &tally {
        if winner.is_none_or(|w| entry.2 > w.2) {
            winner = Some(entry);
        }
    }

    let votes: BTreeMap<String, usize> =
        tally.iter().map(|(r, _, n)| (r.clone(), *n)).collect();
    match winner {
        Some((_, value, _)) => json!({"winner": value, "votes": votes}),
        None => json!({"winner": null, "votes": votes}),
    }
}

pub(crate) fn summarize(inputs: &[(String, VarType, Value)]) -> Value {
    let sections = inputs
        .iter()
        .enumerate()
        .map(|(i, (key, ty, value))| format!("{}. [{key}] ({ty})\n{}", i + 1, stringify(value)))
        .collect::<Vec<_>>()
        .join("\n\n");
    Value::String(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenate_joins_in_order() {
        let out = concatenate(&[json!("first"), json!({"n": 2}), json!("third")]);
        let text = out.as_str().unwrap();
        assert_eq!(
            text,
            format!("first{CONCAT_SEPARATOR}{{\"n\":2}}{CONCAT_SEPARATOR}third")
        );
    }

    #[test]
    fn structured_is_last_wins_on_duplicate_keys() {
        let out = structured(&[
            ("a".into(), json!(1)),
            ("b".into(), json!(2)),
            ("a".into(), json!(3)),
        ]);
        assert_eq!(out, json!({"a": 3, "b": 2}));
    }

    #[test]
    fn vote_picks_the_majority() {
        let out = vote(&[json!("x"), json!("y"), json!("x")]);
        assert_eq!(out["winner"], json!("x"));
        assert_eq!(out["votes"]["x"], json!(2));
        assert_eq!(out["votes"]["y"], json!(1));
    }

    #[test]
    fn vote_ties_go_to_first_seen() {
        let out = vote(&[json!("b"), json!("a")]);
        assert_eq!(out["winner"], json!("b"));
    }

    #[test]
    fn vote_on_empty_input() {
        let out = vote(&[]);
        assert_eq!(out["winner"], Value::Null);
    }

    #[test]
    fn summarize_numbers_and_labels_sections() {
        let out = summarize(&[
            ("alpha".into(), VarType::Text, json!("one")),
            ("beta".into(), VarType::Json, json!([1])),
        ]);
        let text = out.as_str().unwrap();
        assert!(text.starts_with("1. [alpha] (text)\none"));
        assert!(text.contains("2. [beta] (json)\n[1]"));
    }

    #[test]
    fn strategy_debug_names() {
        assert_eq!(format!("{:?}", MergeStrategy::Vote), "Vote");
        let custom = MergeStrategy::Custom(Arc::new(|_| {
            Box::pin(async { Ok(Value::Null) }) as MergeFuture
        }));
        assert_eq!(format!("{custom:?}"), "Custom(..)");
    }
}
