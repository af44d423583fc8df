//! Text serializations of a named graph.
//!
//! Both formats write subjects and objects as absolute IRIs (relative identifiers
//! are resolved against the schema base URI). Parsing returns those absolute IRIs
//! unchanged; the store folds them back to base-relative form on insert, which is
//! what makes `import(export(g)) == g` hold exactly.

use crate::error::{GraphError, Result};
use crate::types::{GraphSchema, Triple};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
const OWL_NS: &str = "http://www.w3.org/2002/07/owl#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Turtle,
    JsonLd,
}

impl ExportFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Turtle => "turtle",
            Self::JsonLd => "json-ld",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "turtle" | "ttl" => Ok(Self::Turtle),
            "json-ld" | "jsonld" => Ok(Self::JsonLd),
            other => Err(GraphError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn export_triples(
    triples: &[Triple],
    schema: &GraphSchema,
    graph: &str,
    format: ExportFormat,
) -> Result<String> {
    match format {
        ExportFormat::Turtle => Ok(to_turtle(triples, schema, graph)),
        ExportFormat::JsonLd => to_json_ld(triples, schema, graph),
    }
}

pub fn import_triples(payload: &str, format: ExportFormat) -> Result<Vec<Triple>> {
    match format {
        ExportFormat::Turtle => from_turtle(payload),
        ExportFormat::JsonLd => from_json_ld(payload),
    }
}

fn to_turtle(triples: &[Triple], schema: &GraphSchema, graph: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("@base <{}> .\n", escape_iri(schema.base_uri())));
    out.push_str(&format!("@prefix rdf: <{RDF_NS}> .\n"));
    out.push_str(&format!("@prefix rdfs: <{RDFS_NS}> .\n"));
    out.push_str(&format!("@prefix owl: <{OWL_NS}> .\n"));
    out.push_str(&format!("# graph: {}\n", escape_comment(graph)));
    out.push('\n');

    for triple in triples {
        out.push_str(&format!(
            "<{}> <{}> <{}> .\n",
            escape_iri(&schema.absolutize(&triple.subject)),
            escape_iri(&triple.predicate),
            escape_iri(&schema.absolutize(&triple.object)),
        ));
    }
    out
}

fn from_turtle(payload: &str) -> Result<Vec<Triple>> {
    let mut triples = Vec::new();
    for (idx, raw) in payload.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            continue;
        }
        let parse_err = |message: String| GraphError::Parse {
            line: idx + 1,
            message,
        };

        let (subject, rest) = take_iri(line).map_err(parse_err)?;
        let (predicate, rest) = take_iri(rest).map_err(parse_err)?;
        let (object, rest) = take_iri(rest).map_err(parse_err)?;
        if rest.trim() != "." {
            return Err(parse_err(format!("expected '.' but found '{}'", rest.trim())));
        }
        triples.push(Triple::new(subject, predicate, object));
    }
    Ok(triples)
}

fn take_iri(input: &str) -> std::result::Result<(String, &str), String> {
    let input = input.trim_start();
    let body = input
        .strip_prefix('<')
        .ok_or_else(|| format!("expected '<' at '{input}'"))?;
    let end = body
        .find('>')
        .ok_or_else(|| "unterminated IRI".to_string())?;
    Ok((unescape_iri(&body[..end])?, &body[end + 1..]))
}

/// Characters that may not appear raw inside `<...>`.
fn needs_escape(c: char) -> bool {
    c <= ' ' || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' | '\u{7f}')
}

fn escape_iri(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if needs_escape(c) {
            out.push_str(&format!("\\u{:04X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

/// Control characters would end the comment line early.
fn escape_comment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_control() {
            out.push_str(&format!("\\u{:04X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_iri(value: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let width = match chars.next() {
            Some('u') => 4,
            Some('U') => 8,
            other => return Err(format!("invalid escape '\\{}'", other.unwrap_or(' '))),
        };
        let hex: String = chars.by_ref().take(width).collect();
        let decoded = u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|_| hex.len() == width)
            .and_then(char::from_u32)
            .ok_or_else(|| format!("invalid escape sequence '{hex}'"))?;
        out.push(decoded);
    }
    Ok(out)
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonLdDocument {
    #[serde(rename = "@context")]
    context: JsonLdContext,
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "@graph")]
    graph: Vec<TripleRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonLdContext {
    #[serde(rename = "@base")]
    base: String,
    #[serde(default)]
    rdf: Option<String>,
    #[serde(default)]
    rdfs: Option<String>,
    #[serde(default)]
    owl: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TripleRecord {
    subject: String,
    predicate: String,
    object: String,
}

fn to_json_ld(triples: &[Triple], schema: &GraphSchema, graph: &str) -> Result<String> {
    let document = JsonLdDocument {
        context: JsonLdContext {
            base: schema.base_uri().to_string(),
            rdf: Some(RDF_NS.to_string()),
            rdfs: Some(RDFS_NS.to_string()),
            owl: Some(OWL_NS.to_string()),
        },
        id: Some(graph.to_string()),
        graph: triples
            .iter()
            .map(|t| TripleRecord {
                subject: schema.absolutize(&t.subject),
                predicate: t.predicate.clone(),
                object: schema.absolutize(&t.object),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

fn from_json_ld(payload: &str) -> Result<Vec<Triple>> {
    let document: JsonLdDocument = serde_json::from_str(payload)?;
    Ok(document
        .graph
        .into_iter()
        .map(|r| Triple::new(r.subject, r.predicate, r.object))
        .collect())
}
