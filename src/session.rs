// ============================================================================
// 关联会话 - the facade hosts talk to
// ============================================================================
//
// One session per workspace. It owns the result store of the latest run and
// hands out per-file / per-method records. Referenced files are computed on
// first request and cached on the method record until the next ingestion
// replaces the run.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::CorrelatorConfig;
use crate::finder::{FileFinder, WorkspaceFinder};
use crate::report::{parse_trx, parse_trx_file, RawTestOutcome};
use crate::resolver::ReferenceResolver;
use crate::results::{
    aggregate, FinderClassLocator, IngestSummary, ResultStore, TestCounts, TestFileResult, TestMethodResult,
};
use crate::scanner::{RegexSymbolInference, SymbolInference};

pub struct CorrelationSession {
    root: PathBuf,
    config: CorrelatorConfig,
    finder: Box<dyn FileFinder>,
    inference: Box<dyn SymbolInference>,
    store: ResultStore,
}

impl CorrelationSession {
    /// Session over `root` with the workspace walker and the regex symbol
    /// inference.
    pub fn new(root: impl AsRef<Path>, config: CorrelatorConfig) -> Self {
        let root = root.as_ref();
        let root = fs::canonicalize(root).unwrap_or_else(|e| {
            debug!(root = %root.display(), error = %e, "cannot canonicalize root, using as given");
            root.to_path_buf()
        });
        let finder = WorkspaceFinder::new(root.clone(), &config);
        Self::with_components(root, config, Box::new(finder), Box::new(RegexSymbolInference))
    }

    /// Session with caller-supplied search and inference strategies.
    pub fn with_components(
        root: impl Into<PathBuf>,
        config: CorrelatorConfig,
        finder: Box<dyn FileFinder>,
        inference: Box<dyn SymbolInference>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            finder,
            inference,
            store: ResultStore::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Replace the store with the results of one TRX report.
    ///
    /// A malformed report is logged and leaves the previous store untouched.
    pub fn ingest(&mut self, report_xml: &str) -> Option<IngestSummary> {
        match parse_trx(report_xml) {
            Ok(outcomes) => Some(self.install(&outcomes, None)),
            Err(e) => {
                warn!(error = %e, "report rejected, keeping previous results");
                None
            }
        }
    }

    /// [`ingest`](Self::ingest) for a report on disk; the path is recorded
    /// on the store.
    pub fn ingest_file(&mut self, path: &Path) -> Option<IngestSummary> {
        match parse_trx_file(path) {
            Ok(outcomes) => Some(self.install(&outcomes, Some(path.to_path_buf()))),
            Err(e) => {
                warn!(report = %path.display(), error = %e, "report rejected, keeping previous results");
                None
            }
        }
    }

    fn install(&mut self, outcomes: &[RawTestOutcome], report_path: Option<PathBuf>) -> IngestSummary {
        let locator = FinderClassLocator::new(self.finder.as_ref(), &self.config);
        let (mut store, summary) = aggregate(outcomes, &locator);
        store.report_path = report_path;

        info!(
            parsed = summary.parsed,
            recorded = summary.recorded,
            unresolved = summary.unresolved,
            files = summary.files,
            "results ingested"
        );
        self.store = store;
        summary
    }

    /// Replace the store with results built by the host.
    pub fn replace_results(&mut self, files: impl IntoIterator<Item = TestFileResult>) {
        self.store = ResultStore::from_files(files);
        debug!(files = self.store.files.len(), "results replaced");
    }

    pub fn clear(&mut self) {
        self.store = ResultStore::default();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn result_for(&self, path: &Path) -> Option<&TestFileResult> {
        self.store.get(&self.key_for(path))
    }

    /// Failed methods of one file, in report order. Empty for unknown files.
    pub fn failed_methods(&self, path: &Path) -> Vec<&TestMethodResult> {
        self.result_for(path)
            .map(|file| file.failed_methods().collect())
            .unwrap_or_default()
    }

    /// Production files `method_name` in the test file at `path` references.
    ///
    /// The first non-empty answer is cached on every record of that method
    /// name in the file; later calls return it without searching again.
    pub fn referenced_files(&mut self, path: &Path, method_name: &str) -> Vec<PathBuf> {
        let key = self.key_for(path);
        let Some(file) = self.store.files.get(&key) else {
            debug!(file = %key.display(), "no results for file");
            return Vec::new();
        };
        let Some(method) = file.methods.iter().find(|m| m.method_name == method_name) else {
            debug!(file = %key.display(), method = method_name, "no result for method");
            return Vec::new();
        };
        if method.has_references() {
            return method.referenced_files.clone();
        }

        let resolved = ReferenceResolver::new(self.finder.as_ref(), self.inference.as_ref(), &self.config)
            .compute(method_name, &key);

        if !resolved.is_empty() {
            if let Some(file) = self.store.files.get_mut(&key) {
                for method in file.methods.iter_mut().filter(|m| m.method_name == method_name) {
                    method.fill_references(resolved.clone());
                }
            }
        }
        resolved
    }

    /// Files with results, in path order.
    pub fn files(&self) -> impl Iterator<Item = &TestFileResult> {
        self.store.files.values()
    }

    pub fn summary(&self) -> TestCounts {
        self.store.totals()
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Store key for a host path: relative paths are joined to the root, and
    /// a path the store does not hold verbatim is looked up by its canonical
    /// form, so symlinked or `..` spellings reach the same record.
    fn key_for(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        if self.store.files.contains_key(&joined) {
            return joined;
        }
        fs::canonicalize(&joined).unwrap_or(joined)
    }
}
