//! JavaScript/TypeScript module graph via `madge`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Analyzer, AnalyzerError, AnalyzerKind, AnalyzerOutcome, ExternalCommand};
use crate::config::AnalyzerConfig;

pub struct JavaScriptAnalyzer {
    root: PathBuf,
    tool: String,
    entries: Vec<String>,
    fallback: String,
    output: PathBuf,
}

impl JavaScriptAnalyzer {
    pub fn new(root: &Path, config: &AnalyzerConfig, output: PathBuf) -> Self {
        Self {
            root: root.to_path_buf(),
            tool: config.javascript_tool.clone(),
            entries: config.javascript_entries.clone(),
            fallback: config.javascript_fallback.clone(),
            output,
        }
    }

    /// First existing entry candidate, else the fallback directory.
    pub fn entry_point(&self) -> &str {
        self.entries
            .iter()
            .find(|candidate| self.root.join(candidate).exists())
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }

    pub fn command(&self) -> ExternalCommand {
        ExternalCommand::new(&self.tool).args([self.entry_point(), "--format", "json"])
    }
}

#[async_trait]
impl Analyzer for JavaScriptAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::JavaScript
    }

    async fn run(&self, files: &[PathBuf]) -> Result<AnalyzerOutcome, AnalyzerError> {
        if files.is_empty() {
            return Ok(AnalyzerOutcome::Skipped);
        }

        crate::debug_event!(
            "javascript",
            "updating",
            "{} files from {}",
            files.len(),
            self.entry_point()
        );

        // madge rebuilds the whole graph from the entry point; raw output is kept verbatim
        let graph = self.command().run(&self.root).await?;
        tokio::fs::write(&self.output, &graph)
            .await
            .map_err(|source| AnalyzerError::ArtifactWrite {
                path: self.output.clone(),
                source,
            })?;

        Ok(AnalyzerOutcome::Written(self.output.clone()))
    }
}
