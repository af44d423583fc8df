use crate::error::{GraphError, Result};
use crate::serialize::{self, ExportFormat};
use crate::types::{
    ConfigureStatus, GraphSchema, GraphSchemaConfig, SourceDelta, Triple, TriplePattern,
};
use crate::visualize::{visualize_triples, Visualization, VisualFormat};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe in-memory triple store.
///
/// Every stored triple carries its named graph. Inserts are unions: a fact that
/// is already present is never duplicated and never reordered, so queries return
/// facts in first-insertion order.
///
/// Facts can be inserted directly (they stay until the store is dropped) or on
/// behalf of a source, usually a workspace-relative file path. Source-owned facts
/// are superseded by [`FactGraphStore::replace_source`] and dropped by
/// [`FactGraphStore::remove_source`] once no other owner holds them.
#[derive(Default)]
pub struct FactGraphStore {
    state: RwLock<StoreState>,
}

#[derive(Default)]
pub(crate) struct StoreState {
    schema: Option<GraphSchema>,
    triples: Vec<Triple>,
    index: HashSet<Triple>,
    pinned: HashSet<Triple>,
    sources: HashMap<String, HashSet<Triple>>,
    owners: HashMap<Triple, usize>,
}

impl FactGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that is already configured with `schema`.
    #[must_use]
    pub fn with_schema(schema: GraphSchema) -> Self {
        Self {
            state: RwLock::new(StoreState {
                schema: Some(schema),
                ..StoreState::default()
            }),
        }
    }

    pub fn configure(&self, config: &GraphSchemaConfig) -> Result<ConfigureStatus> {
        let schema = GraphSchema::from_config(config)?;
        let mut state = self.write();
        if !state.triples.is_empty() && state.schema.as_ref() != Some(&schema) {
            return Err(GraphError::SchemaLocked(state.triples.len()));
        }

        let status = ConfigureStatus {
            status: "configured",
            graph_type: schema.kind().as_str(),
            base_uri: schema.base_uri().to_string(),
            default_graph: schema.default_graph().to_string(),
            inference_enabled: schema.inference_enabled(),
        };
        info!(
            "Fact graph configured: type={} base_uri={} default_graph={}",
            status.graph_type, status.base_uri, status.default_graph
        );
        state.schema = Some(schema);
        Ok(status)
    }

    pub fn schema(&self) -> Option<GraphSchema> {
        self.read().schema.clone()
    }

    /// Insert facts into `graph` (default graph when `None`).
    ///
    /// Returns the number of facts that were not present before. The batch is
    /// validated up front, so an invalid triple leaves the store untouched.
    pub fn insert(&self, triples: &[Triple], graph: Option<&str>) -> Result<usize> {
        let mut state = self.write();
        let scoped = state.scope(triples, graph)?;

        let mut added = 0;
        for triple in scoped {
            state.pinned.insert(triple.clone());
            if state.push(triple) {
                added += 1;
            }
        }
        debug!("Inserted {added}/{} triples", triples.len());
        Ok(added)
    }

    /// Replace every fact previously contributed by `source` with `triples`.
    pub fn replace_source(
        &self,
        source: &str,
        triples: &[Triple],
        graph: Option<&str>,
    ) -> Result<SourceDelta> {
        let mut state = self.write();
        let scoped = state.scope(triples, graph)?;
        let next: HashSet<Triple> = scoped.iter().cloned().collect();
        let previous = state.sources.remove(source).unwrap_or_default();

        let stale: Vec<Triple> = previous.difference(&next).cloned().collect();
        let removed = state.release(stale);

        let mut added = 0;
        // Keep caller order for deterministic insertion order.
        let mut seen = HashSet::new();
        for triple in scoped {
            if previous.contains(&triple) || !seen.insert(triple.clone()) {
                continue;
            }
            *state.owners.entry(triple.clone()).or_default() += 1;
            if state.push(triple) {
                added += 1;
            }
        }

        if !next.is_empty() {
            state.sources.insert(source.to_string(), next);
        }
        debug!("Source {source}: +{added} -{removed}");
        Ok(SourceDelta { added, removed })
    }

    /// Drop every fact owned only by `source`. Returns the number removed.
    pub fn remove_source(&self, source: &str) -> usize {
        let mut state = self.write();
        let Some(previous) = state.sources.remove(source) else {
            return 0;
        };
        let removed = state.release(previous.into_iter().collect());
        debug!("Source {source} removed ({removed} triples)");
        removed
    }

    #[must_use]
    pub fn sources(&self) -> BTreeSet<String> {
        self.read().sources.keys().cloned().collect()
    }

    /// Sources named `path` itself or nested below it as `path/...`.
    #[must_use]
    pub fn sources_under(&self, path: &str) -> Vec<String> {
        let path = path.trim_end_matches('/');
        let nested = format!("{path}/");
        self.read()
            .sources
            .keys()
            .filter(|source| source.as_str() == path || source.starts_with(&nested))
            .cloned()
            .collect()
    }

    /// Facts matching `pattern`, in insertion order. An empty store yields an empty result.
    pub fn query(&self, pattern: &TriplePattern) -> Result<Vec<Triple>> {
        pattern.validate()?;
        let state = self.read();
        let pattern = state.canonical_pattern(pattern);
        Ok(state
            .triples
            .iter()
            .filter(|t| pattern.matches(t))
            .cloned()
            .collect())
    }

    pub fn ask(&self, pattern: &TriplePattern) -> Result<bool> {
        pattern.validate()?;
        let state = self.read();
        let pattern = state.canonical_pattern(pattern);
        Ok(state.triples.iter().any(|t| pattern.matches(t)))
    }

    #[must_use]
    pub fn triples(&self) -> Vec<Triple> {
        self.read().triples.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().triples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().triples.is_empty()
    }

    #[must_use]
    pub fn graph_names(&self) -> BTreeSet<String> {
        self.read()
            .triples
            .iter()
            .filter_map(|t| t.graph.clone())
            .collect()
    }

    /// Serialize one named graph (default graph when `None`).
    pub fn export(&self, format: ExportFormat, graph: Option<&str>) -> Result<String> {
        let state = self.read();
        let schema = state.schema.as_ref().ok_or(GraphError::NotConfigured)?;
        let graph = graph.unwrap_or(schema.default_graph());
        let triples: Vec<Triple> = state
            .triples
            .iter()
            .filter(|t| t.graph.as_deref() == Some(graph))
            .cloned()
            .collect();
        serialize::export_triples(&triples, schema, graph, format)
    }

    /// Parse a payload produced by [`FactGraphStore::export`] and insert it into `graph`.
    pub fn import(&self, payload: &str, format: ExportFormat, graph: Option<&str>) -> Result<usize> {
        let parsed = serialize::import_triples(payload, format)?;
        self.insert(&parsed, graph)
    }

    /// Render every stored fact as a diagram.
    pub fn visualize(&self, format: VisualFormat) -> Visualization {
        let state = self.read();
        visualize_triples(&state.triples, format)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreState {
    pub(crate) fn schema(&self) -> Result<&GraphSchema> {
        self.schema.as_ref().ok_or(GraphError::NotConfigured)
    }

    pub(crate) fn schema_mut(&mut self) -> Result<&mut GraphSchema> {
        self.schema.as_mut().ok_or(GraphError::NotConfigured)
    }

    /// Validate, canonicalize identifiers, and attach the target graph.
    fn scope(&self, triples: &[Triple], graph: Option<&str>) -> Result<Vec<Triple>> {
        let schema = self.schema()?;
        let graph = graph.unwrap_or(schema.default_graph());
        if graph.trim().is_empty() {
            return Err(GraphError::InvalidTriple("graph name must not be empty".into()));
        }

        triples
            .iter()
            .map(|t| {
                t.validate()?;
                Ok(Triple {
                    subject: schema.relativize(&t.subject),
                    predicate: t.predicate.clone(),
                    object: schema.relativize(&t.object),
                    graph: Some(graph.to_string()),
                })
            })
            .collect()
    }

    fn canonical_pattern(&self, pattern: &TriplePattern) -> TriplePattern {
        let Some(schema) = self.schema.as_ref() else {
            return pattern.clone();
        };
        TriplePattern {
            subject: pattern.subject.as_deref().map(|s| schema.relativize(s)),
            predicate: pattern.predicate.clone(),
            object: pattern.object.as_deref().map(|o| schema.relativize(o)),
            graph: pattern.graph.clone(),
        }
    }

    pub(crate) fn all(&self) -> &[Triple] {
        &self.triples
    }

    pub(crate) fn push(&mut self, triple: Triple) -> bool {
        if self.index.contains(&triple) {
            return false;
        }
        self.index.insert(triple.clone());
        self.triples.push(triple);
        true
    }

    pub(crate) fn pin(&mut self, triple: Triple) -> bool {
        self.pinned.insert(triple.clone());
        self.push(triple)
    }

    /// Drop one source ownership of each triple; returns how many facts left the store.
    fn release(&mut self, triples: Vec<Triple>) -> usize {
        let mut gone = HashSet::new();
        for triple in triples {
            let remaining = match self.owners.get_mut(&triple) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                self.owners.remove(&triple);
                if !self.pinned.contains(&triple) && self.index.remove(&triple) {
                    gone.insert(triple);
                }
            }
        }
        if !gone.is_empty() {
            self.triples.retain(|t| !gone.contains(t));
        }
        gone.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FactGraphStore {
        let store = FactGraphStore::new();
        store
            .configure(&GraphSchemaConfig::rdf("http://test.local/"))
            .unwrap();
        store
    }

    #[test]
    fn insert_requires_configuration() {
        let store = FactGraphStore::new();
        let err = store
            .insert(&[Triple::new("A", "p", "B")], None)
            .unwrap_err();
        assert!(matches!(err, GraphError::NotConfigured));
    }

    #[test]
    fn invalid_triple_rejects_whole_batch() {
        let store = store();
        let err = store
            .insert(&[Triple::new("A", "p", "B"), Triple::new("", "p", "C")], None)
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidTriple(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn base_uri_identifiers_are_stored_relative() {
        let store = store();
        store
            .insert(&[Triple::new("http://test.local/A", "p", "B")], None)
            .unwrap();
        let hits = store
            .query(&TriplePattern::any().subject("A"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store
            .query(&TriplePattern::any().subject("http://test.local/A"))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn schema_locked_once_populated() {
        let store = store();
        store.insert(&[Triple::new("A", "p", "B")], None).unwrap();
        let err = store
            .configure(&GraphSchemaConfig::rdf("http://other.local/"))
            .unwrap_err();
        assert!(matches!(err, GraphError::SchemaLocked(1)));
        // Re-applying the same schema is fine.
        store
            .configure(&GraphSchemaConfig::rdf("http://test.local/"))
            .unwrap();
    }

    #[test]
    fn shared_fact_survives_until_last_owner_leaves() {
        let store = store();
        let shared = Triple::new("Parser", "rdf:type", "Class");
        store
            .replace_source("a.rs", &[shared.clone(), Triple::new("a.rs", "mentions", "Parser")], None)
            .unwrap();
        store
            .replace_source("b.rs", &[shared.clone()], None)
            .unwrap();
        assert_eq!(store.len(), 2);

        assert_eq!(store.remove_source("a.rs"), 1);
        assert!(store.ask(&TriplePattern::exact(&shared)).unwrap());

        assert_eq!(store.remove_source("b.rs"), 1);
        assert!(store.is_empty());
        assert_eq!(store.remove_source("b.rs"), 0);
    }

    #[test]
    fn pinned_fact_outlives_sources() {
        let store = store();
        let fact = Triple::new("A", "p", "B");
        store.insert(&[fact.clone()], None).unwrap();
        let delta = store.replace_source("f", &[fact.clone()], None).unwrap();
        assert_eq!(delta.added, 0);
        store.remove_source("f");
        assert_eq!(store.len(), 1);
    }
}
