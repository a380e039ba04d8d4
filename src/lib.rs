// ============================================================================
// TestLens - Test Result Correlation Library
// ============================================================================
//
// Reads Visual Studio TRX reports, groups outcomes by the test source file
// that declares each test class, and, on request, guesses which production
// files a failing test method exercises.
//
// The main binary (main.rs) is a thin CLI over `session::CorrelationSession`.

pub mod cli;
pub mod config;
pub mod error;
pub mod finder;
pub mod report;
pub mod resolver;
pub mod results;
pub mod scanner;
pub mod session;

pub use config::CorrelatorConfig;
pub use error::{ConfigError, ReportError};
pub use results::{IngestSummary, TestFileResult, TestMethodResult, TestOutcome};
pub use session::CorrelationSession;
