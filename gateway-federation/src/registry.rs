use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::DuplicateSubgraphError;
use crate::subgraph::Subgraph;

/// Holds the current schema of every known subgraph.
///
/// Snapshots are immutable and ordered by subgraph name, so compositions made from them do not
/// depend on registration order.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    subgraphs: RwLock<IndexMap<String, Arc<Subgraph>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subgraph or replaces the schema of an existing one.
    ///
    /// Registering a schema whose signature matches the current one is a no-op. A different
    /// schema under an existing name is only accepted when `replace` is set. Returns the schema
    /// that was replaced, if any.
    pub fn register(
        &self,
        subgraph: Subgraph,
        replace: bool,
    ) -> Result<Option<Arc<Subgraph>>, DuplicateSubgraphError> {
        let mut subgraphs = self.subgraphs.write();
        if let Some(existing) = subgraphs.get(&subgraph.name) {
            if is_unchanged(existing, &subgraph) {
                tracing::debug!(subgraph = %subgraph.name, "subgraph schema unchanged");
                return Ok(None);
            }
            if !replace {
                return Err(duplicate(existing, &subgraph));
            }
        }
        tracing::info!(
            subgraph = %subgraph.name,
            signature = %subgraph.signature(),
            "registered subgraph schema"
        );
        let name = subgraph.name.clone();
        let previous = subgraphs.insert(name, Arc::new(subgraph));
        subgraphs.sort_keys();
        Ok(previous)
    }

    /// Fails if registering `subgraph` without `replace` would be rejected.
    pub fn check_new(&self, subgraph: &Subgraph) -> Result<(), DuplicateSubgraphError> {
        match self.subgraphs.read().get(&subgraph.name) {
            Some(existing) if !is_unchanged(existing, subgraph) => Err(duplicate(existing, subgraph)),
            _ => Ok(()),
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Subgraph>> {
        self.subgraphs.write().shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Subgraph>> {
        self.subgraphs.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.subgraphs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subgraphs.read().is_empty()
    }

    /// Every registered subgraph, ordered by name.
    pub fn snapshot(&self) -> Arc<[Arc<Subgraph>]> {
        self.subgraphs.read().values().cloned().collect()
    }

    /// The snapshot that would result from registering `candidate`, without registering it.
    pub fn snapshot_with(&self, candidate: Arc<Subgraph>) -> Arc<[Arc<Subgraph>]> {
        let mut subgraphs = self.subgraphs.read().clone();
        subgraphs.insert(candidate.name.clone(), candidate);
        subgraphs.sort_keys();
        subgraphs.into_values().collect()
    }
}

fn is_unchanged(existing: &Subgraph, submitted: &Subgraph) -> bool {
    existing.signature() == submitted.signature() && existing.url == submitted.url
}

fn duplicate(existing: &Subgraph, submitted: &Subgraph) -> DuplicateSubgraphError {
    DuplicateSubgraphError {
        name: submitted.name.clone(),
        existing: existing.signature().to_string(),
        submitted: submitted.signature().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subgraph(name: &str, sdl: &str) -> Subgraph {
        Subgraph::parse(name, format!("http://{name}"), sdl).unwrap()
    }

    #[test]
    fn snapshots_are_sorted_by_name() {
        let registry = SchemaRegistry::new();
        registry
            .register(subgraph("reviews", "type Query { a: Int }"), false)
            .unwrap();
        registry
            .register(subgraph("accounts", "type Query { b: Int }"), false)
            .unwrap();
        let names: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|subgraph| subgraph.name.clone())
            .collect();
        assert_eq!(names, vec!["accounts", "reviews"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registering_the_same_schema_is_a_no_op() {
        let registry = SchemaRegistry::new();
        registry
            .register(subgraph("a", "type Query { a: Int }"), false)
            .unwrap();
        let previous = registry
            .register(subgraph("a", "type Query {\n  a: Int\n}"), false)
            .unwrap();
        assert!(previous.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_schema_requires_replace() {
        let registry = SchemaRegistry::new();
        registry
            .register(subgraph("a", "type Query { a: Int }"), false)
            .unwrap();
        let error = registry
            .register(subgraph("a", "type Query { b: Int }"), false)
            .unwrap_err();
        assert_eq!(error.name, "a");
        assert!(registry
            .check_new(&subgraph("a", "type Query { b: Int }"))
            .is_err());
        assert!(registry
            .check_new(&subgraph("a", "type Query { a: Int }"))
            .is_ok());

        let previous = registry
            .register(subgraph("a", "type Query { b: Int }"), true)
            .unwrap()
            .unwrap();
        assert_eq!(previous.sdl(), "type Query { a: Int }");
        assert_eq!(
            registry.get("a").unwrap().sdl(),
            "type Query { b: Int }"
        );
    }

    #[test]
    fn snapshot_with_does_not_register() {
        let registry = SchemaRegistry::new();
        registry
            .register(subgraph("b", "type Query { b: Int }"), false)
            .unwrap();
        let candidate = Arc::new(subgraph("a", "type Query { a: Int }"));
        let snapshot = registry.snapshot_with(candidate);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "a");
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("b").is_some());
        assert!(registry.is_empty());
    }
}
