use thiserror::Error;

#[derive(Error, Debug)]
pub enum LodestoreError {
    #[error("Query error: {0}")]
    Query(String),

    #[error("Query has multiple root nodes")]
    MultipleRoots,

    #[error("Unknown context: {context}")]
    UnknownContext { context: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Elements already exist: {}", ids.join(", "))]
    DuplicateIds { ids: Vec<String> },

    #[error("Operation '{0}' invoked on a dead group")]
    Dead(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LodestoreError>;
