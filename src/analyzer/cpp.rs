//! C/C++ graph placeholder.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{Analyzer, AnalyzerError, AnalyzerKind, AnalyzerOutcome};

/// Accepts C/C++ batches without producing an artifact.
///
/// TODO: drive clangd's call hierarchy to emit a cpp graph artifact.
#[derive(Debug, Default)]
pub struct CppAnalyzer;

#[async_trait]
impl Analyzer for CppAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Cpp
    }

    async fn run(&self, files: &[PathBuf]) -> Result<AnalyzerOutcome, AnalyzerError> {
        if !files.is_empty() {
            crate::debug_event!(
                "cpp",
                "update requested (not implemented)",
                "{} files",
                files.len()
            );
        }
        Ok(AnalyzerOutcome::Skipped)
    }
}
