//! Shared variable storage for agent forests.
//!
//! The [`ContextStore`] keeps every intermediate and final value produced
//! by spawned agents, addressable by key and circulated as constant-size
//! [`VarRef`] handles. Values past the memory ceiling spill to disk; refs
//! resolve identically either way.

mod catalog;
mod variable;

pub use catalog::{
    CHARS_PER_TOKEN, ContextStore, DEFAULT_MEMORY_CEILING, ListFilter, SetOptions, StoreConfig,
};
pub use variable::{Payload, VarRef, VarScope, VarType};
