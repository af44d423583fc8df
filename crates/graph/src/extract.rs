//! Capitalization-based entity spotting.
//!
//! This is a syntactic heuristic, not a parser: it flags title-case words as
//! candidate entities and never validates them. Graph quality is bounded by it.

use crate::types::{Triple, OWL_CLASS, RDFS_SUBCLASS_OF, RDF_TYPE};
use serde::{Deserialize, Serialize};

pub const SOURCE_FILE_CLASS: &str = "SourceFile";
pub const MENTIONS: &str = "mentions";

const TRIM_CHARS: &[char] = &['.', ',', ';', ':', '(', ')', '[', ']', '{', '}'];
const MIN_ENTITY_CHARS: usize = 4;

/// Candidate entity mentions in `text`, in order of appearance (duplicates kept).
///
/// A token qualifies when, after trimming punctuation, it is at least four
/// characters long, starts with an uppercase letter, and the rest of its cased
/// characters are lowercase (`Parser`, `Function1`; not `HTTP` or `parseFile`).
#[must_use]
pub fn extract_entities(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| word.trim_matches(TRIM_CHARS))
        .filter(|word| is_candidate(word))
        .map(str::to_string)
        .collect()
}

fn is_candidate(word: &str) -> bool {
    if word.chars().count() < MIN_ENTITY_CHARS {
        return false;
    }
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_uppercase() {
        return false;
    }
    let mut cased = false;
    for c in chars {
        if c.is_uppercase() {
            return false;
        }
        if c.is_lowercase() {
            cased = true;
        }
    }
    cased
}

/// Ontology class inferred from an entity's name, if any.
#[must_use]
pub fn entity_class(entity: &str) -> Option<&'static str> {
    let lower = entity.to_lowercase();
    if lower.contains("function") {
        Some("Function")
    } else if lower.contains("class") {
        Some("Class")
    } else {
        None
    }
}

/// Facts describing one source document: its type, the entities it mentions,
/// and the class of each entity that names one.
#[must_use]
pub fn describe_source(source: &str, text: &str) -> Vec<Triple> {
    let mut triples = vec![Triple::new(source, RDF_TYPE, SOURCE_FILE_CLASS)];
    let mut entities = extract_entities(text);
    let mut seen = std::collections::HashSet::new();
    entities.retain(|e| seen.insert(e.clone()));

    for entity in entities {
        triples.push(Triple::new(source, MENTIONS, entity.clone()));
        if let Some(class) = entity_class(&entity) {
            triples.push(Triple::new(entity, RDF_TYPE, class));
        }
    }
    triples
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyClass {
    pub name: String,
    #[serde(default)]
    pub parent_classes: Vec<String>,
}

impl OntologyClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_classes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_classes.push(parent.into());
        self
    }
}

/// Typed entity facts for a set of text chunks plus declared ontology classes.
#[must_use]
pub fn build_fact_graph<S: AsRef<str>>(chunks: &[S], ontology: &[OntologyClass]) -> Vec<Triple> {
    let mut triples = Vec::new();
    for chunk in chunks {
        for entity in extract_entities(chunk.as_ref()) {
            if let Some(class) = entity_class(&entity) {
                triples.push(Triple::new(entity, RDF_TYPE, class));
            }
        }
    }
    for class in ontology {
        triples.push(Triple::new(class.name.clone(), RDF_TYPE, OWL_CLASS));
        for parent in &class.parent_classes {
            triples.push(Triple::new(class.name.clone(), RDFS_SUBCLASS_OF, parent.clone()));
        }
    }
    triples
}
