use crate::error::Result;
use crate::store::FactGraphStore;
use crate::types::{InferenceRule, Triple, RDFS_SUBCLASS_OF, RDF_TYPE};
use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InferenceStatus {
    pub status: &'static str,
    pub rule_count: usize,
    pub inference_enabled: bool,
}

impl FactGraphStore {
    /// Register inference rules by name and switch inference on.
    pub fn add_inference_rules(&self, rules: &[&str]) -> Result<InferenceStatus> {
        let parsed = rules
            .iter()
            .map(|r| r.parse::<InferenceRule>())
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.write();
        let schema = state.schema_mut()?;
        schema.add_rules(&parsed);
        Ok(InferenceStatus {
            status: "rules_added",
            rule_count: parsed.len(),
            inference_enabled: schema.inference_enabled(),
        })
    }

    /// Materialize the schema's inference rules, graph by graph.
    ///
    /// Returns the number of newly derived facts; zero when inference is disabled.
    /// Derived facts are pinned, they do not belong to any source.
    pub fn infer(&self) -> Result<usize> {
        let mut state = self.write();
        let schema = state.schema()?;
        if !schema.inference_enabled() {
            return Ok(0);
        }
        let rules = schema.inference_rules();

        let derived = derive(state.all(), &rules);
        let mut added = 0;
        for triple in derived {
            if state.pin(triple) {
                added += 1;
            }
        }
        if added > 0 {
            info!("Inference added {added} triples");
        }
        Ok(added)
    }
}

fn derive(triples: &[Triple], rules: &[InferenceRule]) -> Vec<Triple> {
    // graph -> class -> direct superclasses
    let mut parents: BTreeMap<Option<&str>, BTreeMap<&str, BTreeSet<&str>>> = BTreeMap::new();
    for t in triples.iter().filter(|t| t.predicate == RDFS_SUBCLASS_OF) {
        parents
            .entry(t.graph.as_deref())
            .or_default()
            .entry(t.subject.as_str())
            .or_default()
            .insert(t.object.as_str());
    }

    let mut derived = Vec::new();
    for (graph, edges) in &parents {
        let closure: BTreeMap<&str, BTreeSet<&str>> = edges
            .keys()
            .map(|class| (*class, ancestors(*class, edges)))
            .collect();
        let scoped = |t: Triple| match graph {
            Some(g) => t.in_graph(*g),
            None => t,
        };

        if rules.contains(&InferenceRule::SubclassTransitivity) {
            for (class, ancestors) in &closure {
                for ancestor in ancestors {
                    derived.push(scoped(Triple::new(*class, RDFS_SUBCLASS_OF, *ancestor)));
                }
            }
        }

        if rules.contains(&InferenceRule::TypePropagation) {
            for t in triples
                .iter()
                .filter(|t| t.predicate == RDF_TYPE && t.graph.as_deref() == *graph)
            {
                if let Some(ancestors) = closure.get(t.object.as_str()) {
                    for ancestor in ancestors {
                        derived.push(scoped(Triple::new(
                            t.subject.clone(),
                            RDF_TYPE,
                            *ancestor,
                        )));
                    }
                }
            }
        }
    }
    derived
}

fn ancestors<'a>(class: &'a str, edges: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = edges.get(class).into_iter().flatten().copied().collect();
    while let Some(next) = stack.pop() {
        if next == class || !seen.insert(next) {
            continue;
        }
        if let Some(more) = edges.get(next) {
            stack.extend(more.iter().copied());
        }
    }
    seen
}
