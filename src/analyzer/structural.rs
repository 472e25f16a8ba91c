//! Structural graph artifact.
//!
//! Real syntax-tree extraction is not wired in yet. The analyzer still
//! succeeds by writing an envelope with empty node and edge lists plus the
//! files of the batch, so consumers always find a current artifact.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::{Analyzer, AnalyzerError, AnalyzerKind, AnalyzerOutcome};

const TOOL_NAME: &str = "codegraphd";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralEnvelope {
    pub nodes: Vec<serde_json::Value>,
    pub edges: Vec<serde_json::Value>,
    pub metadata: EnvelopeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMetadata {
    pub tool: String,
    pub timestamp: DateTime<Local>,
    pub files: Vec<String>,
}

impl StructuralEnvelope {
    pub fn for_files(files: &[PathBuf]) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            metadata: EnvelopeMetadata {
                tool: TOOL_NAME.to_string(),
                timestamp: Local::now(),
                files: files.iter().map(|f| f.display().to_string()).collect(),
            },
        }
    }
}

pub struct StructuralParseAnalyzer {
    output: PathBuf,
}

impl StructuralParseAnalyzer {
    pub fn new(output: PathBuf) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Analyzer for StructuralParseAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::StructuralParse
    }

    async fn run(&self, files: &[PathBuf]) -> Result<AnalyzerOutcome, AnalyzerError> {
        crate::debug_event!("structural", "updating", "{} files", files.len());

        let json = serde_json::to_string_pretty(&StructuralEnvelope::for_files(files))?;
        tokio::fs::write(&self.output, json)
            .await
            .map_err(|source| AnalyzerError::ArtifactWrite {
                path: self.output.clone(),
                source,
            })?;

        Ok(AnalyzerOutcome::Written(self.output.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_envelope_written() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("ts.json");
        let analyzer = StructuralParseAnalyzer::new(output.clone());

        let files = vec![PathBuf::from("src/a.py"), PathBuf::from("web/b.ts")];
        let outcome = analyzer.run(&files).await.unwrap();
        assert_eq!(outcome, AnalyzerOutcome::Written(output.clone()));

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(doc["nodes"], serde_json::json!([]));
        assert_eq!(doc["edges"], serde_json::json!([]));
        assert_eq!(doc["metadata"]["tool"], "codegraphd");
        assert_eq!(doc["metadata"]["files"], serde_json::json!(["src/a.py", "web/b.ts"]));
        assert!(doc["metadata"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_unwritable_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let analyzer = StructuralParseAnalyzer::new(dir.path().join("missing/ts.json"));
        let err = analyzer.run(&[PathBuf::from("a.c")]).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::ArtifactWrite { .. }));
    }
}
