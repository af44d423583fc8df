use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Schema validation failed: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),

    #[error("Graph store is not configured")]
    NotConfigured,

    #[error("Schema cannot change while the store holds {0} triples")]
    SchemaLocked(usize),

    #[error("Invalid triple: {0}")]
    InvalidTriple(String),

    #[error("Malformed pattern: {0}")]
    MalformedPattern(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
