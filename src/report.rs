// ============================================================================
// TRX 报告解析 - Visual Studio test run reports
// ============================================================================
//
// A TRX file lists executed results and test definitions in two separate
// sections, joined by id:
//
//   <TestRun>
//     <Results>
//       <UnitTestResult testId=".." testName=".." outcome="Failed" duration="..">
//         <Output>
//           <ErrorInfo><Message>..</Message><StackTrace>..</StackTrace></ErrorInfo>
//           <StdOut>..</StdOut>
//         </Output>
//       </UnitTestResult>
//     </Results>
//     <TestDefinitions>
//       <UnitTest id=".." name="..">
//         <TestMethod className="Ns.Class, Assembly" name=".." />
//       </UnitTest>
//     </TestDefinitions>
//   </TestRun>

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CorrelatorConfig;
use crate::error::ReportError;

/// Outcome of one result entry. Anything but `Passed` (Failed, Error,
/// Timeout, NotExecuted, Inconclusive, ...) counts as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RawOutcomeKind {
    Passed,
    Failed,
}

impl RawOutcomeKind {
    pub fn from_trx(outcome: &str) -> Self {
        match outcome.trim() {
            "Passed" => RawOutcomeKind::Passed,
            _ => RawOutcomeKind::Failed,
        }
    }
}

/// One executed test, bound to its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawTestOutcome {
    /// Namespace-qualified class name, assembly qualification removed
    pub class_name: String,
    /// Unqualified method name (may carry a theory argument list)
    pub method_name: String,
    pub outcome: RawOutcomeKind,
    /// Only set for failures
    pub error_detail: Option<String>,
    pub duration: Option<Duration>,
}

/// `<UnitTestResult>` as read from the Results section.
#[derive(Debug, Default)]
struct ResultEntry {
    test_id: Option<String>,
    test_name: Option<String>,
    outcome: Option<String>,
    duration: Option<String>,
    message: Option<String>,
    stack_trace: Option<String>,
    std_out: Option<String>,
}

/// `<UnitTest>` as read from the TestDefinitions section.
#[derive(Debug, Default)]
struct Definition {
    name: Option<String>,
    class_name: Option<String>,
    method_test_name: Option<String>,
    method_method_name: Option<String>,
    method_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    Message,
    StackTrace,
    StdOut,
}

/// Parse TRX content into outcomes, in result-entry order.
///
/// Entries that cannot be bound to a definition, or whose method name cannot
/// be determined, are skipped. Structural problems (bad XML, no `TestRun`
/// root, missing `Results`/`TestDefinitions`) are errors.
pub fn parse_trx(content: &str) -> Result<Vec<RawTestOutcome>, ReportError> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    let mut saw_root = false;
    let mut saw_results = false;
    let mut saw_definitions = false;

    let mut results: Vec<ResultEntry> = Vec::new();
    let mut definitions: HashMap<String, Definition> = HashMap::new();

    let mut current_result: Option<ResultEntry> = None;
    let mut current_definition: Option<(String, Definition)> = None;
    let mut capture: Option<(TextTarget, String)> = None;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => return Err(ReportError::xml(reader.buffer_position(), e.to_string())),
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = local_name(e);
                let path: Vec<&str> = stack.iter().map(String::as_str).collect();

                match (path.as_slice(), name.as_str()) {
                    ([], "TestRun") => saw_root = true,
                    (["TestRun"], "Results") => saw_results = true,
                    (["TestRun"], "TestDefinitions") => saw_definitions = true,
                    (["TestRun", "Results"], "UnitTestResult") => {
                        current_result = Some(ResultEntry {
                            test_id: attr(e, "testId"),
                            test_name: attr(e, "testName"),
                            outcome: attr(e, "outcome"),
                            duration: attr(e, "duration"),
                            ..Default::default()
                        });
                    }
                    (["TestRun", "TestDefinitions"], "UnitTest") => {
                        let id = attr(e, "id").unwrap_or_default();
                        current_definition = Some((
                            id,
                            Definition {
                                name: attr(e, "name"),
                                ..Default::default()
                            },
                        ));
                    }
                    (["TestRun", "TestDefinitions", "UnitTest"], "TestMethod") => {
                        if let Some((_, def)) = current_definition.as_mut() {
                            // only the first TestMethod counts
                            if def.class_name.is_none() {
                                def.class_name = attr(e, "className");
                                def.method_test_name = attr(e, "testName");
                                def.method_method_name = attr(e, "methodName");
                                def.method_name = attr(e, "name");
                            }
                        }
                    }
                    ([.., "UnitTestResult", "Output", "ErrorInfo"], "Message") => {
                        capture = Some((TextTarget::Message, String::new()));
                    }
                    ([.., "UnitTestResult", "Output", "ErrorInfo"], "StackTrace") => {
                        capture = Some((TextTarget::StackTrace, String::new()));
                    }
                    ([.., "UnitTestResult", "Output"], "StdOut") => {
                        capture = Some((TextTarget::StdOut, String::new()));
                    }
                    _ => {}
                }

                if is_empty {
                    close_element(
                        &name,
                        &mut current_result,
                        &mut current_definition,
                        &mut capture,
                        &mut results,
                        &mut definitions,
                    );
                } else {
                    stack.push(name);
                }
            }
            Event::End(_) => {
                if let Some(name) = stack.pop() {
                    close_element(
                        &name,
                        &mut current_result,
                        &mut current_definition,
                        &mut capture,
                        &mut results,
                        &mut definitions,
                    );
                }
            }
            Event::Text(ref e) => {
                if let Some((_, text)) = capture.as_mut() {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| ReportError::xml(reader.buffer_position(), err.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(ref e) => {
                if let Some((_, text)) = capture.as_mut() {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ReportError::MissingRoot);
    }
    if !saw_results {
        return Err(ReportError::MissingSection("Results"));
    }
    if !saw_definitions {
        return Err(ReportError::MissingSection("TestDefinitions"));
    }

    Ok(bind_results(results, &definitions))
}

/// Read and parse a report file.
pub fn parse_trx_file(path: &Path) -> Result<Vec<RawTestOutcome>, ReportError> {
    let content = fs::read_to_string(path).map_err(|source| ReportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_trx(&content)
}

fn close_element(
    name: &str,
    current_result: &mut Option<ResultEntry>,
    current_definition: &mut Option<(String, Definition)>,
    capture: &mut Option<(TextTarget, String)>,
    results: &mut Vec<ResultEntry>,
    definitions: &mut HashMap<String, Definition>,
) {
    match name {
        "Message" | "StackTrace" | "StdOut" => {
            if let (Some((target, text)), Some(result)) = (capture.take(), current_result.as_mut()) {
                let slot = match target {
                    TextTarget::Message => &mut result.message,
                    TextTarget::StackTrace => &mut result.stack_trace,
                    TextTarget::StdOut => &mut result.std_out,
                };
                // first occurrence wins
                if slot.is_none() {
                    *slot = Some(text);
                }
            }
        }
        "UnitTestResult" => {
            if let Some(result) = current_result.take() {
                results.push(result);
            }
        }
        "UnitTest" => {
            if let Some((id, def)) = current_definition.take() {
                if id.is_empty() {
                    debug!("test definition without id ignored");
                } else {
                    definitions.entry(id).or_insert(def);
                }
            }
        }
        _ => {}
    }
}

/// Join result entries with their definitions.
fn bind_results(results: Vec<ResultEntry>, definitions: &HashMap<String, Definition>) -> Vec<RawTestOutcome> {
    let mut outcomes = Vec::with_capacity(results.len());

    for result in results {
        let Some(def) = result.test_id.as_deref().and_then(|id| definitions.get(id)) else {
            debug!(test_id = ?result.test_id, "result has no matching test definition, skipped");
            continue;
        };

        let Some(method_name) = pick_method_name(&result, def) else {
            warn!(test_id = ?result.test_id, "cannot determine test method name, skipped");
            continue;
        };

        let class_name = def
            .class_name
            .as_deref()
            .map(strip_assembly_qualifier)
            .unwrap_or_default();

        let outcome = RawOutcomeKind::from_trx(result.outcome.as_deref().unwrap_or_default());
        let error_detail = match outcome {
            RawOutcomeKind::Failed => Some(error_detail(&result, &method_name)),
            RawOutcomeKind::Passed => None,
        };
        let duration = result.duration.as_deref().and_then(parse_trx_duration);

        outcomes.push(RawTestOutcome {
            class_name,
            method_name,
            outcome,
            error_detail,
            duration,
        });
    }

    outcomes
}

/// Method name, by priority: result testName, TestMethod testName,
/// UnitTest name, TestMethod methodName, TestMethod name.
fn pick_method_name(result: &ResultEntry, def: &Definition) -> Option<String> {
    [
        result.test_name.as_deref(),
        def.method_test_name.as_deref(),
        def.name.as_deref(),
        def.method_method_name.as_deref(),
        def.method_name.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|name| !name.is_empty())
    .map(|name| unqualify(name).to_string())
}

/// `Shop.Tests.OrderTests.Creates` -> `Creates`.
///
/// Dots inside a trailing argument list (`Rounds(x: 1.5)`) are not
/// qualification.
pub fn unqualify(name: &str) -> &str {
    let head_end = name.find('(').unwrap_or(name.len());
    match name[..head_end].rfind('.') {
        Some(dot) => &name[dot + 1..],
        None => name,
    }
}

/// `Shop.Tests.OrderTests, Shop.Tests, Version=1.0.0.0` -> `Shop.Tests.OrderTests`
pub fn strip_assembly_qualifier(class_name: &str) -> String {
    class_name.split(',').next().unwrap_or_default().trim().to_string()
}

fn error_detail(result: &ResultEntry, method_name: &str) -> String {
    [&result.message, &result.stack_trace, &result.std_out]
        .into_iter()
        .flatten()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match result.outcome.as_deref().map(str::trim) {
            Some(outcome) if !outcome.is_empty() && outcome != "Failed" => {
                format!("Test '{method_name}' ended as {outcome} without error details")
            }
            _ => format!("Test '{method_name}' failed without error details"),
        })
}

/// `hh:mm:ss.fffffff` as written by vstest.
pub fn parse_trx_duration(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
    let whole: u64 = whole.parse().ok()?;
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // 7 fractional digits in practice; keep nanosecond precision
    let mut nanos: String = fraction.chars().take(9).collect();
    while nanos.len() < 9 {
        nanos.push('0');
    }
    let nanos: u32 = nanos.parse().ok()?;

    let secs = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(whole)?;
    Some(Duration::new(secs, nanos))
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attr(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ============================================================================
// Report discovery
// ============================================================================

/// `.trx` files under `<root>/<results_dir>`, newest first.
pub fn discover_reports(root: &Path, config: &CorrelatorConfig) -> Vec<PathBuf> {
    let dir = root.join(&config.results_dir);
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "results directory not found");
        return Vec::new();
    }

    let mut reports: Vec<(SystemTime, PathBuf)> = WalkDir::new(&dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("trx"))
        })
        .map(|e| {
            let modified = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.into_path())
        })
        .collect();

    reports.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    reports.into_iter().map(|(_, path)| path).collect()
}
