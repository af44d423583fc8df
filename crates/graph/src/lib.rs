//! # Fact Graph
//!
//! In-memory knowledge graph of code entities and their relations.
//!
//! ## Architecture
//!
//! ```text
//! Source text
//!     │
//!     ├──> Entity extraction (capitalization heuristic)
//!     │      └─ describe_source / build_fact_graph → Triples
//!     │
//!     ├──> FactGraphStore
//!     │      ├─ configure(schema)      rdf only, base URI required
//!     │      ├─ insert / replace_source / remove_source (union semantics)
//!     │      ├─ query / ask            wildcard patterns, insertion order
//!     │      └─ infer                  subClassOf closure, type propagation
//!     │
//!     └──> Output
//!            ├─ export / import        Turtle-style lines, JSON-LD records
//!            └─ visualize              Mermaid, Graphviz DOT
//! ```
//!
//! ## Example
//!
//! ```
//! use factgraph_graph::{ExportFormat, FactGraphStore, GraphSchemaConfig, Triple};
//!
//! let store = FactGraphStore::new();
//! store.configure(&GraphSchemaConfig::rdf("http://example.local/")).unwrap();
//! store.insert(&[Triple::new("Parser", "relatesTo", "Lexer")], None).unwrap();
//!
//! let turtle = store.export(ExportFormat::Turtle, None).unwrap();
//! assert!(turtle.contains("<http://example.local/Parser> <relatesTo> <http://example.local/Lexer> ."));
//! ```

mod error;
mod extract;
mod inference;
mod serialize;
mod store;
mod types;
mod visualize;

pub use error::{GraphError, Result};
pub use extract::{
    build_fact_graph, describe_source, entity_class, extract_entities, OntologyClass, MENTIONS,
    SOURCE_FILE_CLASS,
};
pub use inference::InferenceStatus;
pub use serialize::{export_triples, import_triples, ExportFormat};
pub use store::FactGraphStore;
pub use types::{
    is_absolute_iri, validate_graph_schema, ConfigureStatus, GraphKind, GraphSchema,
    GraphSchemaConfig, InferenceRule, SourceDelta, Triple, TriplePattern, DEFAULT_GRAPH,
    OWL_CLASS, RDFS_SUBCLASS_OF, RDF_TYPE,
};
pub use visualize::{visualize_triples, VisualFormat, Visualization};
