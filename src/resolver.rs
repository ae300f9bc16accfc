//! Frame resolution seam
//!
//! Turning an opaque method identifier into a display name belongs to the
//! runtime collaborator (symbol-table lookup); the reader only needs the
//! seam. Implementations must not panic: `None` means "could not resolve"
//! and the reader substitutes a placeholder.

use std::collections::HashMap;

/// Resolves opaque method identifiers to display names.
pub trait FrameResolver: Send + Sync {
    fn resolve(&self, method_id: u64) -> Option<String>;
}

/// Table-backed resolver for tests and replay tooling.
#[derive(Debug, Default)]
pub struct MapResolver {
    names: HashMap<u64, String>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, method_id: u64, name: impl Into<String>) {
        self.names.insert(method_id, name.into());
    }
}

impl<const N: usize> From<[(u64, &str); N]> for MapResolver {
    fn from(entries: [(u64, &str); N]) -> Self {
        let mut resolver = MapResolver::new();
        for (id, name) in entries {
            resolver.insert(id, name);
        }
        resolver
    }
}

impl FrameResolver for MapResolver {
    fn resolve(&self, method_id: u64) -> Option<String> {
        self.names.get(&method_id).cloned()
    }
}

/// Deterministic names for synthetic workloads (stress binary).
#[derive(Debug, Default)]
pub struct SyntheticResolver;

impl FrameResolver for SyntheticResolver {
    fn resolve(&self, method_id: u64) -> Option<String> {
        Some(format!("app.Synthetic.method{}", method_id))
    }
}
