//! One update pass: classify a batch, run every matching analyzer
//! concurrently, record the pass in metrics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinSet;

use super::{
    Analyzer, AnalyzerError, AnalyzerKind, AnalyzerOutcome, CppAnalyzer, JavaScriptAnalyzer,
    PythonAnalyzer, StructuralParseAnalyzer,
};
use crate::config::{Settings, StatePaths};
use crate::metrics::MetricsRecorder;
use crate::watcher::BatchSink;

/// Summary of one dispatch pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub files: usize,
    pub kinds: BTreeSet<AnalyzerKind>,
    pub outcomes: BTreeMap<AnalyzerKind, AnalyzerOutcome>,
    /// Kinds that failed, with the reason. Siblings are unaffected.
    pub failures: BTreeMap<AnalyzerKind, String>,
    pub duration: Duration,
    /// False only when the pass as a whole could not run.
    pub success: bool,
}

impl PassReport {
    fn new(files: usize, kinds: BTreeSet<AnalyzerKind>) -> Self {
        Self {
            files,
            kinds,
            outcomes: BTreeMap::new(),
            failures: BTreeMap::new(),
            duration: Duration::ZERO,
            success: true,
        }
    }
}

/// Routes batches to analyzers by kind.
pub struct Dispatcher {
    analyzers: HashMap<AnalyzerKind, Arc<dyn Analyzer>>,
    state_dir: PathBuf,
    metrics: Arc<MetricsRecorder>,
}

impl Dispatcher {
    /// Empty dispatcher; register analyzers with [`Dispatcher::with_analyzer`].
    pub fn new(state_dir: impl Into<PathBuf>, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            analyzers: HashMap::new(),
            state_dir: state_dir.into(),
            metrics,
        }
    }

    /// Dispatcher wired to the four built-in analyzers.
    pub fn standard(
        settings: &Settings,
        paths: &StatePaths,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let config = &settings.analyzers;
        Self::new(&paths.state_dir, metrics)
            .with_analyzer(Arc::new(PythonAnalyzer::new(
                &paths.root,
                config,
                paths.python_graph.clone(),
            )))
            .with_analyzer(Arc::new(JavaScriptAnalyzer::new(
                &paths.root,
                config,
                paths.javascript_graph.clone(),
            )))
            .with_analyzer(Arc::new(CppAnalyzer))
            .with_analyzer(Arc::new(StructuralParseAnalyzer::new(
                paths.structural_graph.clone(),
            )))
    }

    /// Register (or replace) the analyzer for its kind.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.insert(analyzer.kind(), analyzer);
        self
    }

    /// Run one pass over `batch`.
    ///
    /// Returns `None` when the batch contains no analyzable file; such a
    /// batch is not a pass and is not recorded.
    pub async fn run_pass(&self, batch: Vec<PathBuf>) -> Option<PassReport> {
        let kinds = AnalyzerKind::select(&batch);
        if kinds.is_empty() {
            crate::debug_event!("dispatch", "no analyzers for batch", "{} files", batch.len());
            return None;
        }

        let start = Instant::now();
        let mut report = PassReport::new(batch.len(), kinds);

        tracing::info!(
            "[dispatch] processing {} changed files with {} analyzers",
            report.files,
            report.kinds.len()
        );

        if let Err(e) = self.execute(&batch, &mut report).await {
            tracing::error!("[dispatch] graph update failed: {e}");
            report.success = false;
        }

        report.duration = start.elapsed();
        self.metrics.update(report.duration, report.success).await;

        if report.success {
            tracing::info!(
                "[dispatch] graph update completed in {:.2}s ({} failed)",
                report.duration.as_secs_f64(),
                report.failures.len()
            );
        }

        Some(report)
    }

    async fn execute(&self, batch: &[PathBuf], report: &mut PassReport) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.state_dir).await?;

        let mut tasks = JoinSet::new();
        let mut task_kinds = HashMap::new();

        for kind in &report.kinds {
            let Some(analyzer) = self.analyzers.get(kind).cloned() else {
                tracing::warn!("[dispatch] no analyzer registered for {kind}");
                continue;
            };
            let files = kind.files_for(batch);
            let kind = *kind;
            let handle = tasks.spawn(async move { (kind, analyzer.run(&files).await) });
            task_kinds.insert(handle.id(), kind);
        }

        // Every task is awaited; one failure never cancels the others
        while let Some(joined) = tasks.join_next_with_id().await {
            let (kind, result) = match joined {
                Ok((_, finished)) => finished,
                Err(join_error) => {
                    let Some(kind) = task_kinds.get(&join_error.id()).copied() else {
                        tracing::error!("[dispatch] unknown analyzer task failed: {join_error}");
                        continue;
                    };
                    (kind, Err(AnalyzerError::Panicked(join_error.to_string())))
                }
            };

            match result {
                Ok(outcome) => {
                    crate::debug_event!("dispatch", "analyzer finished", "{kind}: {outcome:?}");
                    report.outcomes.insert(kind, outcome);
                }
                Err(e) => {
                    tracing::warn!("[dispatch] analyzer {kind} failed: {e}");
                    report.failures.insert(kind, e.to_string());
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BatchSink for Dispatcher {
    async fn dispatch(&self, batch: Vec<PathBuf>) {
        if let Some(report) = self.run_pass(batch).await {
            crate::log_event!("dispatch", "processed", "{} file changes", report.files);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use tempfile::TempDir;

    struct PanickingAnalyzer;

    #[async_trait]
    impl Analyzer for PanickingAnalyzer {
        fn kind(&self) -> AnalyzerKind {
            AnalyzerKind::JavaScript
        }

        async fn run(&self, _files: &[PathBuf]) -> Result<AnalyzerOutcome, AnalyzerError> {
            panic!("analyzer blew up");
        }
    }

    fn setup() -> (TempDir, StatePaths, Arc<MetricsRecorder>) {
        let dir = TempDir::new().unwrap();
        let paths = StatePaths::new(dir.path(), std::path::Path::new(".graph"));
        let metrics = Arc::new(MetricsRecorder::new(paths.metrics.clone(), "daemon"));
        (dir, paths, metrics)
    }

    #[tokio::test]
    async fn test_failing_kind_does_not_block_siblings() {
        let (_dir, paths, metrics) = setup();
        let mut settings = Settings::default();
        settings.analyzers = AnalyzerConfig {
            python: "codegraphd-missing-python".to_string(),
            ..AnalyzerConfig::default()
        };
        let dispatcher = Dispatcher::standard(&settings, &paths, metrics.clone());

        let report = dispatcher
            .run_pass(vec![paths.root.join("app.py")])
            .await
            .unwrap();

        assert!(report.success);
        assert!(report.failures.contains_key(&AnalyzerKind::Python));
        assert_eq!(
            report.outcomes[&AnalyzerKind::StructuralParse],
            AnalyzerOutcome::Written(paths.structural_graph.clone())
        );
        assert!(paths.structural_graph.exists());
        assert!(!paths.python_graph.exists());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.updates, 1);
        assert_eq!(snapshot.errors, 0);
    }

    #[tokio::test]
    async fn test_panicking_kind_is_isolated() {
        let (_dir, paths, metrics) = setup();
        let dispatcher = Dispatcher::new(&paths.state_dir, metrics)
            .with_analyzer(Arc::new(PanickingAnalyzer))
            .with_analyzer(Arc::new(StructuralParseAnalyzer::new(
                paths.structural_graph.clone(),
            )));

        let report = dispatcher
            .run_pass(vec![PathBuf::from("web/app.js")])
            .await
            .unwrap();

        assert!(report.success);
        assert!(report.failures[&AnalyzerKind::JavaScript].contains("panicked"));
        assert!(paths.structural_graph.exists());
    }

    #[tokio::test]
    async fn test_unrecognized_batch_is_not_a_pass() {
        let (_dir, paths, metrics) = setup();
        let dispatcher = Dispatcher::standard(&Settings::default(), &paths, metrics.clone());

        assert!(dispatcher.run_pass(vec![PathBuf::from("README.md")]).await.is_none());
        assert_eq!(metrics.snapshot().updates, 0);
        assert!(!paths.metrics.exists());
    }

    #[tokio::test]
    async fn test_pass_failure_recorded_in_metrics() {
        let dir = TempDir::new().unwrap();
        // A regular file where the state directory should be
        let blocked = dir.path().join("state");
        std::fs::write(&blocked, "").unwrap();
        let metrics = Arc::new(MetricsRecorder::new(dir.path().join("metrics.json"), "daemon"));
        let dispatcher = Dispatcher::new(&blocked, metrics.clone())
            .with_analyzer(Arc::new(CppAnalyzer));

        let report = dispatcher
            .run_pass(vec![PathBuf::from("core.cpp")])
            .await
            .unwrap();

        assert!(!report.success);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.updates, 1);
        assert_eq!(snapshot.errors, 1);
        assert!(snapshot.avg_time >= 0.0);
    }

    #[tokio::test]
    async fn test_kinds_receive_their_subsets() {
        let (_dir, paths, metrics) = setup();
        let dispatcher = Dispatcher::standard(&Settings::default(), &paths, metrics);

        let batch = vec![PathBuf::from("core.cpp"), PathBuf::from("notes.md")];
        let report = dispatcher.run_pass(batch).await.unwrap();

        assert_eq!(
            report.kinds,
            BTreeSet::from([AnalyzerKind::Cpp, AnalyzerKind::StructuralParse])
        );
        assert_eq!(report.outcomes[&AnalyzerKind::Cpp], AnalyzerOutcome::Skipped);

        // Structural parse sees the full batch
        let contents = std::fs::read_to_string(&paths.structural_graph).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(doc["metadata"]["files"], serde_json::json!(["core.cpp", "notes.md"]));
    }
}
