//! Python call graph via `pyan`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Analyzer, AnalyzerError, AnalyzerKind, AnalyzerOutcome, ExternalCommand};
use crate::config::AnalyzerConfig;

/// Expands changed Python files to the set that must be re-analyzed.
pub trait RelatedFiles: Send + Sync {
    fn expand(&self, changed: &[PathBuf]) -> Vec<PathBuf>;
}

/// Re-analyze exactly the changed files.
///
/// Import-aware expansion is not implemented; this is the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unexpanded;

impl RelatedFiles for Unexpanded {
    fn expand(&self, changed: &[PathBuf]) -> Vec<PathBuf> {
        changed.to_vec()
    }
}

pub struct PythonAnalyzer {
    root: PathBuf,
    python: String,
    venv_python: PathBuf,
    output: PathBuf,
    related: Box<dyn RelatedFiles>,
}

impl PythonAnalyzer {
    pub fn new(root: &Path, config: &AnalyzerConfig, output: PathBuf) -> Self {
        Self {
            root: root.to_path_buf(),
            python: config.python.clone(),
            venv_python: config.venv_python.clone(),
            output,
            related: Box::new(Unexpanded),
        }
    }

    pub fn with_related(mut self, related: impl RelatedFiles + 'static) -> Self {
        self.related = Box::new(related);
        self
    }

    /// Virtualenv interpreter when present under the root, else the configured one.
    fn interpreter(&self) -> PathBuf {
        let venv = self.root.join(&self.venv_python);
        if venv.exists() {
            venv
        } else {
            PathBuf::from(&self.python)
        }
    }

    pub fn command(&self, files: &[PathBuf]) -> ExternalCommand {
        ExternalCommand::new(self.interpreter())
            .args(["-m", "pyan"])
            .args(files.iter().map(|f| f.as_os_str()))
            .args(["--dot", "--colored", "--grouped"])
    }
}

#[async_trait]
impl Analyzer for PythonAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Python
    }

    async fn run(&self, files: &[PathBuf]) -> Result<AnalyzerOutcome, AnalyzerError> {
        if files.is_empty() {
            return Ok(AnalyzerOutcome::Skipped);
        }

        let targets = self.related.expand(files);
        crate::debug_event!("python", "updating", "{} files", targets.len());

        let dot = self.command(&targets).run(&self.root).await?;
        tokio::fs::write(&self.output, &dot)
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
    use std::ffi::OsString;
    use tempfile::TempDir;

    struct WithSiblings;

    impl RelatedFiles for WithSiblings {
        fn expand(&self, changed: &[PathBuf]) -> Vec<PathBuf> {
            let mut out = changed.to_vec();
            out.push(PathBuf::from("sibling.py"));
            out
        }
    }

    #[test]
    fn test_unexpanded_is_identity() {
        let files = vec![PathBuf::from("a.py"), PathBuf::from("b.py")];
        assert_eq!(Unexpanded.expand(&files), files);
    }

    #[test]
    fn test_command_uses_configured_python() {
        let dir = TempDir::new().unwrap();
        let analyzer = PythonAnalyzer::new(
            dir.path(),
            &AnalyzerConfig::default(),
            dir.path().join("py.dot"),
        );
        let cmd = analyzer.command(&[PathBuf::from("pkg/mod.py")]);

        assert_eq!(cmd.program(), "python");
        let args: Vec<OsString> = ["-m", "pyan", "pkg/mod.py", "--dot", "--colored", "--grouped"]
            .iter()
            .map(OsString::from)
            .collect();
        assert_eq!(cmd.arg_list(), args.as_slice());
    }

    #[test]
    fn test_command_prefers_virtualenv() {
        let dir = TempDir::new().unwrap();
        let venv_bin = dir.path().join(".venv/bin");
        std::fs::create_dir_all(&venv_bin).unwrap();
        std::fs::write(venv_bin.join("python"), "").unwrap();

        let analyzer = PythonAnalyzer::new(
            dir.path(),
            &AnalyzerConfig::default(),
            dir.path().join("py.dot"),
        );
        let cmd = analyzer.command(&[]);
        assert_eq!(PathBuf::from(cmd.program()), venv_bin.join("python"));
    }

    #[tokio::test]
    async fn test_empty_subset_is_skipped() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("py.dot");
        let analyzer = PythonAnalyzer::new(dir.path(), &AnalyzerConfig::default(), output.clone());

        assert_eq!(analyzer.run(&[]).await.unwrap(), AnalyzerOutcome::Skipped);
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_related_expansion_and_artifact() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("py.dot");
        // `echo` stands in for the interpreter so stdout is the argv
        let config = AnalyzerConfig {
            python: "echo".to_string(),
            ..AnalyzerConfig::default()
        };
        let analyzer =
            PythonAnalyzer::new(dir.path(), &config, output.clone()).with_related(WithSiblings);

        let outcome = analyzer.run(&[PathBuf::from("a.py")]).await.unwrap();
        assert_eq!(outcome, AnalyzerOutcome::Written(output.clone()));

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.trim(), "-m pyan a.py sibling.py --dot --colored --grouped");
    }
}
