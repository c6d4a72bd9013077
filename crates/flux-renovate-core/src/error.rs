//! Core error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Cluster path not found: {path}")]
    ClusterPathNotFound { path: PathBuf },

    #[error("Failed to parse YAML in {origin}: {source}")]
    YamlParse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid {resource}: {message}")]
    Shape { resource: String, message: String },

    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidExclude {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to run '{program}': {source}")]
    RenderSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Rendering {root} failed ({status}): {stderr}")]
    Render {
        root: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("Rendering {root} timed out after {seconds}s")]
    RenderTimeout { root: PathBuf, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether this error came from malformed YAML
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::YamlParse { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
