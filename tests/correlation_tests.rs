// ============================================================================
// Integration Tests - Report Ingestion and Reference Resolution
// ============================================================================
//
// These tests run the full pipeline against the `shop-sample` fixture, a
// small C# solution with a TRX report under TestResults/:
// 1. Report discovery and ingestion (grouping, counts, skipped entries)
// 2. Type-based reference resolution through fields and mocks
// 3. Keyword fallback when no referenced type has a file
// 4. Caching of referenced files on the method record

use std::path::{Path, PathBuf};

use testlens::finder::FileFinder;
use testlens::report::discover_reports;
use testlens::results::{FileState, TestCounts};
use testlens::scanner::RegexSymbolInference;
use testlens::{CorrelationSession, CorrelatorConfig};

mod common {
    use std::path::PathBuf;

    use testlens::{CorrelationSession, CorrelatorConfig};

    /// Helper to get the fixtures directory path
    pub fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Helper to get the shop-sample fixture path
    pub fn shop_sample() -> PathBuf {
        fixtures_dir().join("shop-sample")
    }

    /// Session over the fixture with its report already ingested
    pub fn ingested_session() -> CorrelationSession {
        let root = shop_sample();
        let mut session = CorrelationSession::new(&root, CorrelatorConfig::default());
        session
            .ingest_file(&root.join("TestResults").join("run.trx"))
            .expect("fixture report should ingest");
        session
    }
}

const ORDER_TESTS: &str = "tests/Shop.Tests/OrderServiceTests.cs";
const INVENTORY_TESTS: &str = "tests/Shop.Tests/InventoryTests.cs";

#[test]
fn test_discovers_fixture_report() {
    let root = common::shop_sample();
    let reports = discover_reports(&root, &CorrelatorConfig::default());
    assert_eq!(reports, vec![root.join("TestResults").join("run.trx")]);
}

#[test]
fn test_ingest_groups_results_by_test_file() {
    let root = common::shop_sample();
    let mut session = CorrelationSession::new(&root, CorrelatorConfig::default());
    let summary = session.ingest_file(&root.join("TestResults/run.trx")).unwrap();

    // the result without a definition never leaves the parser
    assert_eq!(summary.parsed, 5);
    assert_eq!(summary.recorded, 4);
    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.files, 2);

    let orders = session.result_for(Path::new(ORDER_TESTS)).unwrap();
    assert_eq!(orders.state, FileState::Fail);
    assert_eq!(orders.counts, TestCounts { passed: 1, failed: 1 });
    let names: Vec<&str> = orders.methods.iter().map(|m| m.method_name.as_str()).collect();
    assert_eq!(names, vec!["CreatesOrder", "RejectsInvalidOrder"]);
    assert_eq!(orders.methods[1].error_message.as_deref(), Some("Invalid SKU"));

    let inventory = session.result_for(Path::new(INVENTORY_TESTS)).unwrap();
    assert_eq!(inventory.counts, TestCounts { passed: 0, failed: 2 });
    let names: Vec<&str> = inventory.methods.iter().map(|m| m.method_name.as_str()).collect();
    assert_eq!(names, vec!["Should_Return_NotFound_WhenMissing", "ReservesStock"]);
    assert!(inventory.methods[0].error_message.is_some());
    // a test that never ran is still a failure, with the outcome in its detail
    let detail = inventory.methods[1].error_message.as_deref().unwrap();
    assert!(detail.contains("NotExecuted"), "{detail}");

    assert_eq!(session.summary(), TestCounts { passed: 1, failed: 3 });
    assert_eq!(
        session.store().report_path.as_deref(),
        Some(root.join("TestResults/run.trx").as_path())
    );
}

#[test]
fn test_files_iterate_in_path_order() {
    let session = common::ingested_session();
    let paths: Vec<PathBuf> = session.files().map(|f| f.file_path.clone()).collect();
    assert_eq!(
        paths,
        vec![session.root().join(INVENTORY_TESTS), session.root().join(ORDER_TESTS)]
    );
}

#[test]
fn test_mock_and_field_types_resolve_production_files() {
    let mut session = common::ingested_session();
    let root = session.root().to_path_buf();

    let refs = session.referenced_files(Path::new(ORDER_TESTS), "RejectsInvalidOrder");
    assert_eq!(
        refs,
        vec![
            root.join("src/Shop/Pricing/IPricingEngine.cs"),
            root.join("src/Shop/Pricing/PricingEngine.cs"),
            root.join("src/Shop/OrderService.cs"),
        ]
    );
    assert!(refs.iter().all(|p| !p.components().any(|c| c.as_os_str() == "bin")));
}

#[test]
fn test_keyword_fallback_skips_test_paths() {
    let mut session = common::ingested_session();
    let root = session.root().to_path_buf();

    let refs = session.referenced_files(Path::new(INVENTORY_TESTS), "Should_Return_NotFound_WhenMissing");
    assert_eq!(
        refs,
        vec![
            root.join("src/Shop/Inventory/NotFoundResult.cs"),
            root.join("src/Shop/Inventory/MissingItemHandler.cs"),
        ]
    );
}

#[test]
fn test_references_are_cached_on_the_record() {
    let mut session = common::ingested_session();
    let file = Path::new(ORDER_TESTS);

    let first = session.referenced_files(file, "RejectsInvalidOrder");
    let failed = session.failed_methods(file);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].referenced_files, first);

    // a new ingestion replaces the run, and with it the cache
    let report = session.root().join("TestResults/run.trx");
    session.ingest_file(&report).unwrap();
    assert!(session.failed_methods(file)[0].referenced_files.is_empty());
}

#[test]
fn test_custom_finder_replaces_workspace_walk() {
    struct ListFinder {
        root: PathBuf,
        files: Vec<PathBuf>,
    }

    impl FileFinder for ListFinder {
        fn find_files(&self, name_glob: &str) -> Vec<PathBuf> {
            let pattern = glob::Pattern::new(name_glob).unwrap();
            self.files
                .iter()
                .filter(|p| p.file_name().is_some_and(|n| pattern.matches(&n.to_string_lossy())))
                .cloned()
                .collect()
        }

        fn root(&self) -> &Path {
            &self.root
        }
    }

    let root = PathBuf::from("/virtual");
    let finder = ListFinder {
        root: root.clone(),
        files: vec![
            root.join("a/OrderServiceTests.cs"),
            root.join("b/OrderServiceTests.cs"),
        ],
    };
    let mut session = CorrelationSession::with_components(
        &root,
        CorrelatorConfig::default(),
        Box::new(finder),
        Box::new(RegexSymbolInference),
    );

    let report = std::fs::read_to_string(common::shop_sample().join("TestResults/run.trx")).unwrap();
    let summary = session.ingest(&report).unwrap();
    assert_eq!(summary.files, 1);
    // first match in search order wins
    assert!(session.result_for(&root.join("a/OrderServiceTests.cs")).is_some());
    assert!(session.result_for(&root.join("b/OrderServiceTests.cs")).is_none());
    // unreadable test file: nothing to resolve
    assert!(session
        .referenced_files(&root.join("a/OrderServiceTests.cs"), "RejectsInvalidOrder")
        .is_empty());
}
