//! Analyzer kinds and the dispatch of batches to external graph tools.
//!
//! Each [`AnalyzerKind`] maps to one external invocation that rebuilds one
//! artifact in the state directory. A batch is classified by the extensions
//! it contains; every matching kind runs concurrently and failures stay
//! local to their kind.

mod command;
mod cpp;
mod dispatcher;
mod error;
mod javascript;
mod python;
mod structural;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use command::ExternalCommand;
pub use cpp::CppAnalyzer;
pub use dispatcher::{Dispatcher, PassReport};
pub use error::AnalyzerError;
pub use javascript::JavaScriptAnalyzer;
pub use python::{PythonAnalyzer, RelatedFiles, Unexpanded};
pub use structural::{StructuralParseAnalyzer, StructuralEnvelope};

pub const PYTHON_EXTENSIONS: &[&str] = &["py"];
pub const JAVASCRIPT_EXTENSIONS: &[&str] = &["js", "ts", "jsx", "tsx", "mjs"];
pub const CPP_EXTENSIONS: &[&str] = &["c", "cpp", "h", "hpp", "cc", "cxx"];

/// Family of external graph builder applied to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnalyzerKind {
    Python,
    JavaScript,
    Cpp,
    /// Runs for any recognized source file, on the whole batch.
    StructuralParse,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 4] = [
        AnalyzerKind::Python,
        AnalyzerKind::JavaScript,
        AnalyzerKind::Cpp,
        AnalyzerKind::StructuralParse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerKind::Python => "python",
            AnalyzerKind::JavaScript => "javascript",
            AnalyzerKind::Cpp => "cpp",
            AnalyzerKind::StructuralParse => "structural",
        }
    }

    /// Language kind for a file extension, case-insensitive.
    ///
    /// Never returns `StructuralParse`; that kind follows from any match.
    pub fn for_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if PYTHON_EXTENSIONS.contains(&ext) {
            Some(AnalyzerKind::Python)
        } else if JAVASCRIPT_EXTENSIONS.contains(&ext) {
            Some(AnalyzerKind::JavaScript)
        } else if CPP_EXTENSIONS.contains(&ext) {
            Some(AnalyzerKind::Cpp)
        } else {
            None
        }
    }

    fn for_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::for_extension)
    }

    /// Kinds that must run for `paths`, deduplicated.
    ///
    /// Empty when no path has a recognized source extension.
    pub fn select<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> BTreeSet<Self> {
        let mut kinds: BTreeSet<Self> = paths
            .into_iter()
            .filter_map(|path| Self::for_path(path))
            .collect();
        if !kinds.is_empty() {
            kinds.insert(AnalyzerKind::StructuralParse);
        }
        kinds
    }

    /// The part of `batch` this kind consumes.
    pub fn files_for(&self, batch: &[PathBuf]) -> Vec<PathBuf> {
        match self {
            AnalyzerKind::StructuralParse => batch.to_vec(),
            kind => batch
                .iter()
                .filter(|path| Self::for_path(path) == Some(*kind))
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one successful analyzer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerOutcome {
    /// Artifact rewritten at this path.
    Written(PathBuf),
    /// Nothing to do for this batch (no matching files, or not implemented).
    Skipped,
}

/// One external graph builder.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    /// Rebuild this analyzer's artifact for `files`.
    async fn run(&self, files: &[PathBuf]) -> Result<AnalyzerOutcome, AnalyzerError>;
}
