//! Error types for analyzer invocations.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single analyzer kind. Never escapes the dispatch boundary.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Analyzer task panicked: {0}")]
    Panicked(String),
}
