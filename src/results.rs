// ============================================================================
// 结果模型与聚合 - per-file / per-method test results
// ============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::config::CorrelatorConfig;
use crate::finder::{exact_name_glob, FileFinder};
use crate::report::{RawOutcomeKind, RawTestOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestCounts {
    pub passed: usize,
    pub failed: usize,
}

impl TestCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }
}

/// One executed test method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestMethodResult {
    pub method_name: String,
    pub outcome: TestOutcome,
    pub error_message: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Option<Duration>,
    /// Production files this test exercises; empty until resolved
    pub referenced_files: Vec<PathBuf>,
}

impl TestMethodResult {
    pub fn passed(method_name: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            outcome: TestOutcome::Passed,
            error_message: None,
            duration: None,
            referenced_files: Vec::new(),
        }
    }

    pub fn failed(method_name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            outcome: TestOutcome::Failed,
            error_message: Some(error_message.into()),
            duration: None,
            referenced_files: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == TestOutcome::Failed
    }

    /// Whether the reference cache is filled.
    pub fn has_references(&self) -> bool {
        !self.referenced_files.is_empty()
    }

    /// Store a resolution result. An empty result leaves the cache unfilled.
    pub fn fill_references(&mut self, files: Vec<PathBuf>) {
        if self.referenced_files.is_empty() {
            self.referenced_files = files;
        }
    }
}

fn serialize_millis<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match duration {
        Some(d) => serializer.serialize_some(&(d.as_secs_f64() * 1000.0)),
        None => serializer.serialize_none(),
    }
}

/// Aggregate for one test source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFileResult {
    pub file_path: PathBuf,
    pub state: FileState,
    pub counts: TestCounts,
    pub methods: Vec<TestMethodResult>,
}

impl TestFileResult {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            state: FileState::Pass,
            counts: TestCounts::default(),
            methods: Vec::new(),
        }
    }

    /// Append a method, keeping counts and state in step. A failure turns the
    /// file to `Fail` for the rest of the run.
    pub fn push(&mut self, method: TestMethodResult) {
        match method.outcome {
            TestOutcome::Passed => self.counts.passed += 1,
            TestOutcome::Failed => {
                self.counts.failed += 1;
                self.state = FileState::Fail;
            }
        }
        self.methods.push(method);
    }

    pub fn failed_methods(&self) -> impl Iterator<Item = &TestMethodResult> {
        self.methods.iter().filter(|m| m.is_failed())
    }
}

/// All results of one run, keyed by absolute test file path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultStore {
    pub files: BTreeMap<PathBuf, TestFileResult>,
    pub ingested_at: Option<DateTime<Utc>>,
    pub report_path: Option<PathBuf>,
}

impl ResultStore {
    pub fn from_files(files: impl IntoIterator<Item = TestFileResult>) -> Self {
        let mut store = Self {
            ingested_at: Some(Utc::now()),
            ..Default::default()
        };
        for file in files {
            store.files.insert(file.file_path.clone(), file);
        }
        store
    }

    pub fn get(&self, path: &Path) -> Option<&TestFileResult> {
        self.files.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn totals(&self) -> TestCounts {
        self.files.values().fold(TestCounts::default(), |acc, f| TestCounts {
            passed: acc.passed + f.counts.passed,
            failed: acc.failed + f.counts.failed,
        })
    }
}

/// What one ingestion kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Outcomes delivered by the report parser
    pub parsed: usize,
    /// Outcomes recorded against a test file
    pub recorded: usize,
    /// Dropped: no test file found for the class
    pub unresolved: usize,
    pub files: usize,
}

// ============================================================================
// Class -> file resolution
// ============================================================================

/// Maps a qualified test class name to the file declaring it.
pub trait ClassFileLocator {
    fn locate(&self, class_name: &str) -> Option<PathBuf>;
}

/// Finds `<SimpleClassName>.<ext>` in the workspace; first hit wins.
pub struct FinderClassLocator<'a> {
    finder: &'a dyn FileFinder,
    config: &'a CorrelatorConfig,
}

impl<'a> FinderClassLocator<'a> {
    pub fn new(finder: &'a dyn FileFinder, config: &'a CorrelatorConfig) -> Self {
        Self { finder, config }
    }
}

impl ClassFileLocator for FinderClassLocator<'_> {
    fn locate(&self, class_name: &str) -> Option<PathBuf> {
        let simple = simple_class_name(class_name);
        if simple.is_empty() {
            return None;
        }
        self.finder
            .find_files(&exact_name_glob(simple, self.config))
            .into_iter()
            .next()
    }
}

/// `Shop.Tests.OrderTests+Nested` -> `OrderTests`; `Ns.Generic`1` -> `Generic`
pub fn simple_class_name(class_name: &str) -> &str {
    let outer = class_name.split('+').next().unwrap_or_default();
    let last = outer.rsplit('.').next().unwrap_or_default();
    last.split('`').next().unwrap_or_default().trim()
}

/// Group outcomes by owning file. Outcomes whose class has no file, or that
/// did not pass or fail, are dropped.
pub fn aggregate(outcomes: &[RawTestOutcome], locator: &dyn ClassFileLocator) -> (ResultStore, IngestSummary) {
    let mut files: BTreeMap<PathBuf, TestFileResult> = BTreeMap::new();
    let mut located: HashMap<&str, Option<PathBuf>> = HashMap::new();
    let mut summary = IngestSummary {
        parsed: outcomes.len(),
        ..Default::default()
    };

    for raw in outcomes {
        let method = match raw.outcome {
            RawOutcomeKind::Passed => TestMethodResult::passed(&raw.method_name),
            RawOutcomeKind::Failed => TestMethodResult::failed(
                &raw.method_name,
                raw.error_detail.clone().unwrap_or_default(),
            ),
        }
        .with_duration(raw.duration);

        let path = located
            .entry(raw.class_name.as_str())
            .or_insert_with(|| locator.locate(&raw.class_name));
        let Some(path) = path.clone() else {
            debug!(class = %raw.class_name, method = %raw.method_name, "no file for test class, skipped");
            summary.unresolved += 1;
            continue;
        };

        files
            .entry(path.clone())
            .or_insert_with(|| TestFileResult::new(path))
            .push(method);
        summary.recorded += 1;
    }

    summary.files = files.len();
    let store = ResultStore {
        files,
        ingested_at: Some(Utc::now()),
        report_path: None,
    };
    (store, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct MapLocator(HashMap<String, PathBuf>);

    impl ClassFileLocator for MapLocator {
        fn locate(&self, class_name: &str) -> Option<PathBuf> {
            self.0.get(class_name).cloned()
        }
    }

    fn raw(class: &str, method: &str, outcome: RawOutcomeKind) -> RawTestOutcome {
        let error_detail = match outcome {
            RawOutcomeKind::Failed => Some(format!("{method} broke")),
            _ => None,
        };
        RawTestOutcome {
            class_name: class.to_string(),
            method_name: method.to_string(),
            outcome,
            error_detail,
            duration: None,
        }
    }

    fn locator() -> MapLocator {
        MapLocator(HashMap::from([
            ("Shop.OrderServiceTests".to_string(), PathBuf::from("/w/OrderServiceTests.cs")),
            ("Shop.CartTests".to_string(), PathBuf::from("/w/CartTests.cs")),
        ]))
    }

    #[test]
    fn test_one_pass_one_fail() {
        let outcomes = vec![
            raw("Shop.OrderServiceTests", "CreatesOrder", RawOutcomeKind::Passed),
            raw("Shop.OrderServiceTests", "RejectsInvalidOrder", RawOutcomeKind::Failed),
        ];
        let (store, summary) = aggregate(&outcomes, &locator());

        let file = store.get(Path::new("/w/OrderServiceTests.cs")).unwrap();
        assert_eq!(file.state, FileState::Fail);
        assert_eq!(file.counts, TestCounts { passed: 1, failed: 1 });
        let names: Vec<&str> = file.methods.iter().map(|m| m.method_name.as_str()).collect();
        assert_eq!(names, vec!["CreatesOrder", "RejectsInvalidOrder"]);
        assert_eq!(file.methods[1].error_message.as_deref(), Some("RejectsInvalidOrder broke"));
        assert_eq!(summary.recorded, 2);
        assert_eq!(summary.files, 1);
    }

    #[test]
    fn test_only_unresolved_classes_are_dropped() {
        let outcomes = vec![
            raw("Shop.Missing", "Lost", RawOutcomeKind::Failed),
            raw("Shop.CartTests", "Adds", RawOutcomeKind::Passed),
        ];
        let (store, summary) = aggregate(&outcomes, &locator());

        assert_eq!(store.files.len(), 1);
        assert_eq!(store.totals(), TestCounts { passed: 1, failed: 0 });
        assert_eq!(store.get(Path::new("/w/CartTests.cs")).unwrap().state, FileState::Pass);
        assert_eq!(
            summary,
            IngestSummary { parsed: 2, recorded: 1, unresolved: 1, files: 1 }
        );
    }

    #[test]
    fn test_not_executed_entry_counts_as_failure() {
        let mut skipped = raw("Shop.CartTests", "Skipped", RawOutcomeKind::from_trx("NotExecuted"));
        skipped.error_detail = Some("Test 'Skipped' ended as NotExecuted without error details".to_string());
        let outcomes = vec![raw("Shop.CartTests", "Adds", RawOutcomeKind::Passed), skipped];
        let (store, summary) = aggregate(&outcomes, &locator());

        let cart = store.get(Path::new("/w/CartTests.cs")).unwrap();
        assert_eq!(cart.counts, TestCounts { passed: 1, failed: 1 });
        assert_eq!(cart.state, FileState::Fail);
        assert_eq!(summary.recorded, 2);
        assert!(cart.methods[1].error_message.as_deref().unwrap().contains("NotExecuted"));
    }

    #[test]
    fn test_locator_called_once_per_class() {
        use std::cell::Cell;

        struct CountingLocator(Cell<usize>);
        impl ClassFileLocator for CountingLocator {
            fn locate(&self, _class_name: &str) -> Option<PathBuf> {
                self.0.set(self.0.get() + 1);
                Some(PathBuf::from("/w/T.cs"))
            }
        }

        let outcomes: Vec<_> = (0..5)
            .map(|i| raw("Shop.T", &format!("M{i}"), RawOutcomeKind::Passed))
            .collect();
        let counting = CountingLocator(Cell::new(0));
        aggregate(&outcomes, &counting);
        assert_eq!(counting.0.get(), 1);
    }

    #[test]
    fn test_fill_references_only_once() {
        let mut method = TestMethodResult::failed("M", "boom");
        method.fill_references(Vec::new());
        assert!(!method.has_references());

        method.fill_references(vec![PathBuf::from("/w/A.cs")]);
        method.fill_references(vec![PathBuf::from("/w/B.cs")]);
        assert_eq!(method.referenced_files, vec![PathBuf::from("/w/A.cs")]);
    }

    #[test]
    fn test_simple_class_name() {
        assert_eq!(simple_class_name("Shop.Tests.OrderTests"), "OrderTests");
        assert_eq!(simple_class_name("Shop.Tests.OrderTests+WhenEmpty"), "OrderTests");
        assert_eq!(simple_class_name("Shop.Repo`1"), "Repo");
        assert_eq!(simple_class_name("Bare"), "Bare");
        assert_eq!(simple_class_name(""), "");
    }

    fn outcome_strategy() -> impl Strategy<Value = RawTestOutcome> {
        (
            prop::sample::select(vec!["Shop.OrderServiceTests", "Shop.CartTests", "Shop.Missing"]),
            "[A-Z][a-zA-Z]{2,12}",
            prop::sample::select(vec!["Passed", "Failed", "NotExecuted", "Inconclusive"]),
        )
            .prop_map(|(class, method, outcome)| raw(class, &method, RawOutcomeKind::from_trx(outcome)))
    }

    proptest! {
        /// Recorded outcomes are exactly the counted ones; state tracks failures.
        #[test]
        fn prop_counts_match_recorded(outcomes in prop::collection::vec(outcome_strategy(), 0..40)) {
            let (store, summary) = aggregate(&outcomes, &locator());

            let counted: usize = store.files.values().map(|f| f.counts.total()).sum();
            prop_assert_eq!(counted, summary.recorded);
            prop_assert_eq!(summary.recorded + summary.unresolved, outcomes.len());

            for file in store.files.values() {
                prop_assert_eq!(file.counts.total(), file.methods.len());
                prop_assert_eq!(file.state == FileState::Fail, file.counts.failed > 0);
            }
        }

        /// Per-file method order follows report order.
        #[test]
        fn prop_report_order_preserved(outcomes in prop::collection::vec(outcome_strategy(), 0..40)) {
            let (store, _) = aggregate(&outcomes, &locator());
            let loc = locator();

            for file in store.files.values() {
                let expected: Vec<&str> = outcomes
                    .iter()
                    .filter(|o| loc.0.get(&o.class_name) == Some(&file.file_path))
                    .map(|o| o.method_name.as_str())
                    .collect();
                let actual: Vec<&str> = file.methods.iter().map(|m| m.method_name.as_str()).collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
