use crate::error::{GraphError, Result};
use crate::types::Triple;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualFormat {
    Mermaid,
    Dot,
}

impl FromStr for VisualFormat {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mermaid" => Ok(Self::Mermaid),
            "dot" | "graphviz" => Ok(Self::Dot),
            other => Err(GraphError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Visualization {
    pub format: VisualFormat,
    pub diagram: String,
    pub entities: BTreeSet<String>,
    pub edges: usize,
}

/// Render triples as a node/edge diagram.
///
/// Nodes are every distinct subject and object, numbered in sorted order so the
/// output depends only on the input facts. Edges follow input order.
#[must_use]
pub fn visualize_triples(triples: &[Triple], format: VisualFormat) -> Visualization {
    let entities: BTreeSet<String> = triples
        .iter()
        .flat_map(|t| [t.subject.clone(), t.object.clone()])
        .collect();
    let ids: BTreeMap<&str, String> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.as_str(), format!("n{i}")))
        .collect();

    let mut lines = Vec::with_capacity(entities.len() + triples.len() + 2);
    match format {
        VisualFormat::Mermaid => {
            lines.push("graph TD".to_string());
            for (entity, id) in &ids {
                lines.push(format!("    {id}[\"{}\"]", mermaid_escape(entity)));
            }
            for t in triples {
                lines.push(format!(
                    "    {} -->|\"{}\"| {}",
                    ids[t.subject.as_str()],
                    mermaid_escape(&t.predicate),
                    ids[t.object.as_str()],
                ));
            }
        }
        VisualFormat::Dot => {
            lines.push("digraph factgraph {".to_string());
            for (entity, id) in &ids {
                lines.push(format!("    {id} [label=\"{}\"];", dot_escape(entity)));
            }
            for t in triples {
                lines.push(format!(
                    "    {} -> {} [label=\"{}\"];",
                    ids[t.subject.as_str()],
                    ids[t.object.as_str()],
                    dot_escape(&t.predicate),
                ));
            }
            lines.push("}".to_string());
        }
    }

    Visualization {
        format,
        diagram: lines.join("\n"),
        edges: triples.len(),
        entities,
    }
}

fn mermaid_escape(value: &str) -> String {
    value
        .replace('"', "#quot;")
        .replace('|', "#124;")
        .replace('\n', " ")
}

fn dot_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_output_is_closed() {
        let viz = visualize_triples(&[Triple::new("A", "p", "B")], VisualFormat::Dot);
        assert!(viz.diagram.starts_with("digraph factgraph {"));
        assert!(viz.diagram.ends_with('}'));
        assert!(viz.diagram.contains("n0 -> n1 [label=\"p\"];"));
    }

    #[test]
    fn labels_are_escaped() {
        let viz = visualize_triples(
            &[Triple::new("say \"hi\"", "a|b", "B")],
            VisualFormat::Mermaid,
        );
        assert!(viz.diagram.contains("#quot;hi#quot;"));
        assert!(viz.diagram.contains("a#124;b"));
    }

    #[test]
    fn empty_input_renders_header_only() {
        let viz = visualize_triples(&[], VisualFormat::Mermaid);
        assert_eq!(viz.diagram, "graph TD");
        assert!(viz.entities.is_empty());
        assert_eq!(viz.edges, 0);
    }
}
