use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const RDF_TYPE: &str = "rdf:type";
pub const RDFS_SUBCLASS_OF: &str = "rdfs:subClassOf";
pub const OWL_CLASS: &str = "owl:Class";

pub const DEFAULT_GRAPH: &str = "main";

/// Subject-predicate-object fact, optionally scoped to a named graph.
///
/// Equality is structural: two triples are the same fact only when every field,
/// including the graph scope, matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            graph: None,
        }
    }

    #[must_use]
    pub fn in_graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = Some(graph.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("subject", &self.subject),
            ("predicate", &self.predicate),
            ("object", &self.object),
        ] {
            if value.trim().is_empty() {
                return Err(GraphError::InvalidTriple(format!(
                    "{field} must not be empty ({self})"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)?;
        if let Some(graph) = &self.graph {
            write!(f, " @{graph}")?;
        }
        Ok(())
    }
}

/// Partial triple used for lookups. `None` is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub graph: Option<String>,
}

impl TriplePattern {
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern that matches exactly one fact (in any graph unless scoped).
    #[must_use]
    pub fn exact(triple: &Triple) -> Self {
        Self {
            subject: Some(triple.subject.clone()),
            predicate: Some(triple.predicate.clone()),
            object: Some(triple.object.clone()),
            graph: triple.graph.clone(),
        }
    }

    /// Parse a textual pattern. `*`, `?` and `?name` are wildcards.
    pub fn parse(subject: &str, predicate: &str, object: &str) -> Result<Self> {
        let pattern = Self {
            subject: parse_term(subject),
            predicate: parse_term(predicate),
            object: parse_term(object),
            graph: None,
        };
        pattern.validate()?;
        Ok(pattern)
    }

    #[must_use]
    pub fn subject(mut self, value: impl Into<String>) -> Self {
        self.subject = Some(value.into());
        self
    }

    #[must_use]
    pub fn predicate(mut self, value: impl Into<String>) -> Self {
        self.predicate = Some(value.into());
        self
    }

    #[must_use]
    pub fn object(mut self, value: impl Into<String>) -> Self {
        self.object = Some(value.into());
        self
    }

    #[must_use]
    pub fn graph(mut self, value: impl Into<String>) -> Self {
        self.graph = Some(value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("subject", &self.subject),
            ("predicate", &self.predicate),
            ("object", &self.object),
            ("graph", &self.graph),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(GraphError::MalformedPattern(format!(
                    "bound {field} must not be empty"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_fully_bound(&self) -> bool {
        self.subject.is_some() && self.predicate.is_some() && self.object.is_some()
    }

    #[must_use]
    pub fn matches(&self, triple: &Triple) -> bool {
        fn field(bound: Option<&String>, value: &str) -> bool {
            bound.is_none_or(|b| b == value)
        }

        field(self.subject.as_ref(), &triple.subject)
            && field(self.predicate.as_ref(), &triple.predicate)
            && field(self.object.as_ref(), &triple.object)
            && self
                .graph
                .as_ref()
                .is_none_or(|g| triple.graph.as_deref() == Some(g.as_str()))
    }
}

fn parse_term(raw: &str) -> Option<String> {
    let term = raw.trim();
    if term == "*" || term.starts_with('?') {
        None
    } else {
        Some(term.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphKind {
    Rdf,
}

impl GraphKind {
    pub const ALL: &'static [GraphKind] = &[GraphKind::Rdf];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rdf => "rdf",
        }
    }
}

impl FromStr for GraphKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rdf" => Ok(Self::Rdf),
            other => Err(GraphError::SchemaValidation(vec![format!(
                "Invalid graph type '{other}'. Must be one of: {}",
                supported_kinds()
            )])),
        }
    }
}

fn supported_kinds() -> String {
    GraphKind::ALL
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raw schema configuration as it arrives from a config file or API call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSchemaConfig {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub base_uri: Option<String>,
    #[serde(default)]
    pub default_graph: Option<String>,
    #[serde(default)]
    pub enable_inference: bool,
    #[serde(default)]
    pub inference_rules: Vec<String>,
}

impl GraphSchemaConfig {
    pub fn rdf(base_uri: impl Into<String>) -> Self {
        Self {
            kind: Some(GraphKind::Rdf.as_str().to_string()),
            base_uri: Some(base_uri.into()),
            ..Self::default()
        }
    }
}

/// Validate a raw schema configuration, returning every problem found.
#[must_use]
pub fn validate_graph_schema(config: &GraphSchemaConfig) -> Vec<String> {
    let mut errors = Vec::new();

    match config.kind.as_deref().map(str::trim) {
        None | Some("") => errors.push("Graph type is required".to_string()),
        Some(kind) => {
            if kind.parse::<GraphKind>().is_err() {
                errors.push(format!(
                    "Invalid graph type '{kind}'. Must be one of: {}",
                    supported_kinds()
                ));
            }
        }
    }

    if config.base_uri.as_deref().is_none_or(|b| b.trim().is_empty()) {
        errors.push("Base URI is required".to_string());
    }

    if config
        .default_graph
        .as_deref()
        .is_some_and(|g| g.trim().is_empty())
    {
        errors.push("Default graph name must not be empty".to_string());
    }

    for rule in &config.inference_rules {
        if rule.parse::<InferenceRule>().is_err() {
            errors.push(format!("Unknown inference rule '{rule}'"));
        }
    }

    errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InferenceRule {
    /// `a subClassOf b`, `b subClassOf c` ⇒ `a subClassOf c`
    SubclassTransitivity,
    /// `x type a`, `a subClassOf b` ⇒ `x type b`
    TypePropagation,
}

impl InferenceRule {
    pub const ALL: &'static [InferenceRule] =
        &[Self::SubclassTransitivity, Self::TypePropagation];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubclassTransitivity => "subclass-transitivity",
            Self::TypePropagation => "type-propagation",
        }
    }
}

impl FromStr for InferenceRule {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|rule| rule.as_str() == s.trim())
            .ok_or_else(|| GraphError::SchemaValidation(vec![format!("Unknown inference rule '{s}'")]))
    }
}

/// Validated schema. Only constructible through [`GraphSchema::from_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSchema {
    kind: GraphKind,
    base_uri: String,
    default_graph: String,
    enable_inference: bool,
    inference_rules: Vec<InferenceRule>,
}

impl GraphSchema {
    pub fn from_config(config: &GraphSchemaConfig) -> Result<Self> {
        let errors = validate_graph_schema(config);
        if !errors.is_empty() {
            return Err(GraphError::SchemaValidation(errors));
        }

        let kind = config.kind.as_deref().unwrap_or_default().parse()?;
        let inference_rules = config
            .inference_rules
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind,
            base_uri: config.base_uri.clone().unwrap_or_default().trim().to_string(),
            default_graph: config
                .default_graph
                .clone()
                .unwrap_or_else(|| DEFAULT_GRAPH.to_string()),
            enable_inference: config.enable_inference,
            inference_rules,
        })
    }

    pub fn rdf(base_uri: impl Into<String>) -> Result<Self> {
        Self::from_config(&GraphSchemaConfig::rdf(base_uri))
    }

    #[must_use]
    pub const fn kind(&self) -> GraphKind {
        self.kind
    }

    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    #[must_use]
    pub fn default_graph(&self) -> &str {
        &self.default_graph
    }

    #[must_use]
    pub const fn inference_enabled(&self) -> bool {
        self.enable_inference
    }

    /// Active rules. An inference-enabled schema without explicit rules runs all of them.
    #[must_use]
    pub fn inference_rules(&self) -> Vec<InferenceRule> {
        if self.inference_rules.is_empty() {
            InferenceRule::ALL.to_vec()
        } else {
            self.inference_rules.clone()
        }
    }

    pub(crate) fn add_rules(&mut self, rules: &[InferenceRule]) {
        for rule in rules {
            if !self.inference_rules.contains(rule) {
                self.inference_rules.push(*rule);
            }
        }
        self.enable_inference = true;
    }

    /// Strip the base namespace from identifiers that live under it.
    #[must_use]
    pub fn relativize(&self, id: &str) -> String {
        let mut current = id;
        while let Some(rest) = current.strip_prefix(self.base_uri.as_str()) {
            if rest.is_empty() {
                break;
            }
            current = rest;
        }
        current.to_string()
    }

    /// Resolve a relative identifier against the base namespace.
    #[must_use]
    pub fn absolutize(&self, id: &str) -> String {
        if is_absolute_iri(id) {
            id.to_string()
        } else {
            format!("{}{id}", self.base_uri)
        }
    }
}

/// True when `id` starts with a URI scheme (`http:`, `urn:`, `rdf:` ...).
#[must_use]
pub fn is_absolute_iri(id: &str) -> bool {
    let Some((scheme, _)) = id.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigureStatus {
    pub status: &'static str,
    pub graph_type: &'static str,
    pub base_uri: String,
    pub default_graph: String,
    pub inference_enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceDelta {
    pub added: usize,
    pub removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_type_and_base_uri() {
        let errors = validate_graph_schema(&GraphSchemaConfig::default());
        assert_eq!(errors.len(), 2);

        let invalid = GraphSchemaConfig {
            kind: Some("invalid_type".to_string()),
            ..GraphSchemaConfig::default()
        };
        let errors = validate_graph_schema(&invalid);
        assert!(errors.iter().any(|e| e.contains("Invalid graph type")));
        assert!(errors.iter().any(|e| e.contains("Base URI")));
    }

    #[test]
    fn schema_defaults_graph_name() {
        let schema = GraphSchema::rdf("http://test.local/").unwrap();
        assert_eq!(schema.default_graph(), DEFAULT_GRAPH);
        assert_eq!(schema.kind(), GraphKind::Rdf);
        assert!(!schema.inference_enabled());
    }

    #[test]
    fn relativize_inverts_absolutize() {
        let schema = GraphSchema::rdf("http://test.local/").unwrap();
        for id in ["A", "rdf:type", "http://other.org/x", "a b"] {
            assert_eq!(schema.relativize(&schema.absolutize(id)), id);
        }
        assert_eq!(schema.relativize("http://test.local/http://test.local/x"), "x");
        assert_eq!(schema.relativize("http://test.local/"), "http://test.local/");
    }

    #[test]
    fn absolute_iri_detection() {
        assert!(is_absolute_iri("http://x.org/a"));
        assert!(is_absolute_iri("rdf:type"));
        assert!(is_absolute_iri("urn:isbn:1"));
        assert!(!is_absolute_iri("Function1"));
        assert!(!is_absolute_iri("src/main.rs"));
        assert!(!is_absolute_iri("1abc:def"));
        assert!(!is_absolute_iri(":x"));
    }

    #[test]
    fn pattern_parse_wildcards() {
        let pattern = TriplePattern::parse("?s", "relatesTo", "*").unwrap();
        assert_eq!(pattern.subject, None);
        assert_eq!(pattern.predicate.as_deref(), Some("relatesTo"));
        assert_eq!(pattern.object, None);

        assert!(matches!(
            TriplePattern::parse("", "p", "o"),
            Err(GraphError::MalformedPattern(_))
        ));
    }
}
