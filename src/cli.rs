//! CLI 模式处理器
//!
//! 提供命令行接口，默认输出人类可读格式
//! 使用 --json 参数可输出 JSON 格式

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use serde_json::{json, Value};
use tracing::info;

use crate::config::CorrelatorConfig;
use crate::report::discover_reports;
use crate::resolver::candidate_types;
use crate::results::{IngestSummary, TestCounts, TestFileResult, TestMethodResult};
use crate::scanner::method_body::{locate_method_body, used_variables};
use crate::scanner::{RegexSymbolInference, SymbolInference};
use crate::session::CorrelationSession;

/// Config file picked up from the workspace root when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "testlens.yaml";

/// CLI Commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// 📋 结果摘要 - pass/fail counts per test file
    Summary {
        /// TRX 报告路径 (默认: TestResults 下最新的报告)
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// ❌ 失败列表 - failed methods with their error messages
    Failures {
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// 只显示该测试文件
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 同时解析每个失败方法引用的源文件
        #[arg(long)]
        refs: bool,
    },

    /// 🔗 引用解析 - production files a test method exercises
    Refs {
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// 测试文件路径 (相对于 --root)
        #[arg(short, long)]
        file: PathBuf,

        /// 方法名 (默认: 该文件所有失败方法)
        #[arg(short, long)]
        method: Option<String>,
    },

    /// 🔍 单文件分析 - symbol types inferred from a test file
    Analyze {
        #[arg(short, long)]
        file: PathBuf,

        /// 额外显示该方法使用的变量和候选类型
        #[arg(short, long)]
        method: Option<String>,
    },

    /// ℹ️ 状态
    Status,
}

/// Workspace-level options shared by every command.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub root: PathBuf,
    pub config: CorrelatorConfig,
}

impl CliContext {
    /// Load the config from `config_path`, or `<root>/testlens.yaml` when
    /// present, or fall back to defaults.
    pub fn load(root: PathBuf, config_path: Option<&Path>) -> Result<Self> {
        let implicit = root.join(DEFAULT_CONFIG_FILE);
        let config = match config_path {
            Some(path) => CorrelatorConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None if implicit.is_file() => CorrelatorConfig::from_file(&implicit)
                .with_context(|| format!("loading config {}", implicit.display()))?,
            None => CorrelatorConfig::default(),
        };
        Ok(Self { root, config })
    }

    fn session(&self, report: Option<&Path>) -> Result<(CorrelationSession, IngestSummary)> {
        let report = match report {
            Some(path) => path.to_path_buf(),
            None => discover_reports(&self.root, &self.config)
                .into_iter()
                .next()
                .ok_or_else(|| {
                    anyhow!(
                        "no .trx report found under {}",
                        self.root.join(&self.config.results_dir).display()
                    )
                })?,
        };
        info!(report = %report.display(), "using report");

        let mut session = CorrelationSession::new(&self.root, self.config.clone());
        let summary = session
            .ingest_file(&report)
            .ok_or_else(|| anyhow!("report could not be ingested: {}", report.display()))?;
        Ok((session, summary))
    }
}

/// 处理 CLI 命令
///
/// json_output: 是否输出 JSON 格式（默认 false，输出人类可读格式）
pub fn handle_command(cmd: Command, ctx: &CliContext, json_output: bool) -> Result<()> {
    // 输出结果
    match execute(cmd, ctx, json_output) {
        Ok(value) => {
            if json_output {
                // JSON 格式：包装 success 字段
                let output = json!({
                    "success": true,
                    "data": value
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                // 人类可读格式：直接输出内容
                print_value(&value);
            }
        }
        Err(e) => {
            if json_output {
                let output = json!({
                    "success": false,
                    "error": format!("{e:#}")
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                eprintln!("Error: {e:#}");
            }
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Run one command. Human-readable output comes back as a JSON string.
pub fn execute(cmd: Command, ctx: &CliContext, json_output: bool) -> Result<Value> {
    match cmd {
        Command::Summary { report } => {
            let (session, ingest) = ctx.session(report.as_deref())?;
            let files: Vec<&TestFileResult> = session.files().collect();

            if json_output {
                Ok(json!({
                    "report": session.store().report_path,
                    "ingested_at": session.store().ingested_at,
                    "ingest": ingest,
                    "totals": session.summary(),
                    "files": files,
                }))
            } else {
                Ok(json!(render_summary(session.root(), &files, session.summary(), &ingest)))
            }
        }

        Command::Failures { report, file, refs } => {
            let (mut session, _) = ctx.session(report.as_deref())?;
            let targets: Vec<PathBuf> = match file {
                Some(file) => vec![file],
                None => session
                    .files()
                    .filter(|f| f.counts.failed > 0)
                    .map(|f| f.file_path.clone())
                    .collect(),
            };

            if refs {
                for target in &targets {
                    let names: Vec<String> = session
                        .failed_methods(target)
                        .iter()
                        .map(|m| m.method_name.clone())
                        .collect();
                    for name in names {
                        session.referenced_files(target, &name);
                    }
                }
            }

            let failed: Vec<(&Path, Vec<&TestMethodResult>)> = targets
                .iter()
                .filter_map(|t| session.result_for(t))
                .map(|f| (f.file_path.as_path(), f.failed_methods().collect::<Vec<_>>()))
                .filter(|(_, methods)| !methods.is_empty())
                .collect();

            if json_output {
                let files: Vec<Value> = failed
                    .iter()
                    .map(|(path, methods)| json!({ "file": path, "methods": methods }))
                    .collect();
                Ok(json!(files))
            } else {
                Ok(json!(render_failures(session.root(), &failed)))
            }
        }

        Command::Refs { report, file, method } => {
            let (mut session, _) = ctx.session(report.as_deref())?;
            let result = session
                .result_for(&file)
                .ok_or_else(|| anyhow!("no results for {}", file.display()))?;

            let methods: Vec<String> = match method {
                Some(name) => vec![name],
                None => result.failed_methods().map(|m| m.method_name.clone()).collect(),
            };

            let resolved: Vec<(String, Vec<PathBuf>)> = methods
                .into_iter()
                .map(|name| {
                    let files = session.referenced_files(&file, &name);
                    (name, files)
                })
                .collect();

            if json_output {
                let entries: Vec<Value> = resolved
                    .iter()
                    .map(|(name, files)| json!({ "method": name, "referenced_files": files }))
                    .collect();
                Ok(json!(entries))
            } else {
                let blocks: Vec<String> = resolved
                    .iter()
                    .map(|(name, files)| render_refs(session.root(), name, files))
                    .collect();
                Ok(json!(blocks.join("\n")))
            }
        }

        Command::Analyze { file, method } => {
            let path = if file.is_absolute() { file } else { ctx.root.join(file) };
            let source =
                std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let model = RegexSymbolInference.infer_symbol_types(&source);

            let mut value = json!({
                "file": path,
                "field_types": model.field_types,
                "mock_types": model.mock_types,
                "constructor_params": model.constructor_params,
            });

            if let Some(name) = method {
                let body = locate_method_body(&source, &name)
                    .ok_or_else(|| anyhow!("method {name} not found in {}", path.display()))?;
                let used = used_variables(body);
                value["method"] = json!({
                    "name": name,
                    "candidate_types": candidate_types(&model, &used),
                    "used_variables": used,
                });
            }
            Ok(value)
        }

        Command::Status => {
            let reports = discover_reports(&ctx.root, &ctx.config);
            if json_output {
                Ok(json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "root": ctx.root,
                    "config": ctx.config,
                    "reports": reports,
                }))
            } else {
                // 人类可读格式
                let latest = reports
                    .first()
                    .map(|p| display_relative(&ctx.root, p))
                    .unwrap_or_else(|| "none".to_string());
                Ok(json!(format!(
                    "TestLens v{}\n\
                    Root: {}\n\
                    Source: *.{} (skipping {})\n\
                    Reports: {} found, latest: {}",
                    env!("CARGO_PKG_VERSION"),
                    ctx.root.display(),
                    ctx.config.extension(),
                    ctx.config.build_output_dirs.join(", "),
                    reports.len(),
                    latest
                )))
            }
        }
    }
}

/// 打印 Value，智能处理字符串和其他类型
fn print_value(value: &Value) {
    match value {
        Value::String(s) => println!("{}", s),
        _ => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
    }
}

// ============================================================================
// Human-readable rendering
// ============================================================================

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn render_summary(root: &Path, files: &[&TestFileResult], totals: TestCounts, ingest: &IngestSummary) -> String {
    let mut output = format!(
        "📋 Test results: {} passed, {} failed ({} files)\n",
        totals.passed,
        totals.failed,
        files.len()
    );
    for file in files {
        let mark = if file.counts.failed > 0 { "❌" } else { "✅" };
        output.push_str(&format!(
            "{} {}  {} passed, {} failed\n",
            mark,
            display_relative(root, &file.file_path),
            file.counts.passed,
            file.counts.failed
        ));
    }

    if ingest.unresolved > 0 {
        output.push_str(&format!("Skipped: {} without a test file\n", ingest.unresolved));
    }
    output.trim_end().to_string()
}

fn render_failures(root: &Path, failed: &[(&Path, Vec<&TestMethodResult>)]) -> String {
    if failed.is_empty() {
        return "✅ No failed tests".to_string();
    }

    let mut output = String::new();
    for (path, methods) in failed {
        output.push_str(&format!("❌ {}\n", display_relative(root, path)));
        for method in methods {
            match method.duration {
                Some(d) => output.push_str(&format!("  - {} ({} ms)\n", method.method_name, d.as_millis())),
                None => output.push_str(&format!("  - {}\n", method.method_name)),
            }
            if let Some(first) = method.error_message.as_deref().and_then(|m| m.lines().next()) {
                output.push_str(&format!("    {}\n", first.trim()));
            }
            for file in &method.referenced_files {
                output.push_str(&format!("    → {}\n", display_relative(root, file)));
            }
        }
    }
    output.trim_end().to_string()
}

fn render_refs(root: &Path, method: &str, files: &[PathBuf]) -> String {
    if files.is_empty() {
        return format!("🔗 {method}: no referenced files found");
    }
    let mut output = format!("🔗 {method}: {} file(s)\n", files.len());
    for file in files {
        output.push_str(&format!("  {}\n", display_relative(root, file)));
    }
    output.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_files(root: &Path) -> Vec<TestFileResult> {
        let mut orders = TestFileResult::new(root.join("tests/OrderServiceTests.cs"));
        orders.push(TestMethodResult::passed("CreatesOrder"));
        let mut failed = TestMethodResult::failed("RejectsInvalidOrder", "Invalid SKU\n   at Shop.OrderService.Create()")
            .with_duration(Some(Duration::from_millis(1500)));
        failed.fill_references(vec![root.join("src/OrderService.cs")]);
        orders.push(failed);

        let mut cart = TestFileResult::new(root.join("tests/CartTests.cs"));
        cart.push(TestMethodResult::passed("AddsItem"));
        vec![cart, orders]
    }

    #[test]
    fn test_render_summary() {
        let root = Path::new("/ws");
        let files = sample_files(root);
        let refs: Vec<&TestFileResult> = files.iter().collect();
        let ingest = IngestSummary {
            parsed: 4,
            recorded: 3,
            unresolved: 1,
            files: 2,
        };

        let text = render_summary(root, &refs, TestCounts { passed: 2, failed: 1 }, &ingest);
        insta::assert_snapshot!(text, @r###"
        📋 Test results: 2 passed, 1 failed (2 files)
        ✅ tests/CartTests.cs  1 passed, 0 failed
        ❌ tests/OrderServiceTests.cs  1 passed, 1 failed
        Skipped: 1 without a test file
        "###);
    }

    #[test]
    fn test_render_failures() {
        let root = Path::new("/ws");
        let files = sample_files(root);
        let failed: Vec<(&Path, Vec<&TestMethodResult>)> = files
            .iter()
            .map(|f| (f.file_path.as_path(), f.failed_methods().collect::<Vec<_>>()))
            .filter(|(_, m)| !m.is_empty())
            .collect();

        insta::assert_snapshot!(render_failures(root, &failed), @r###"
        ❌ tests/OrderServiceTests.cs
          - RejectsInvalidOrder (1500 ms)
            Invalid SKU
            → src/OrderService.cs
        "###);
        assert_eq!(render_failures(root, &[]), "✅ No failed tests");
    }

    #[test]
    fn test_render_refs() {
        let root = Path::new("/ws");
        let files = vec![root.join("src/OrderService.cs"), root.join("src/Pricing/PricingEngine.cs")];

        insta::assert_snapshot!(render_refs(root, "RejectsInvalidOrder", &files), @r###"
        🔗 RejectsInvalidOrder: 2 file(s)
          src/OrderService.cs
          src/Pricing/PricingEngine.cs
        "###);
        assert_eq!(render_refs(root, "Ghost", &[]), "🔗 Ghost: no referenced files found");
    }

    #[test]
    fn test_context_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CliContext::load(dir.path().to_path_buf(), None).unwrap();
        assert_eq!(ctx.config, CorrelatorConfig::default());
    }

    #[test]
    fn test_context_picks_up_workspace_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "results_dir: out/trx\n").unwrap();
        let ctx = CliContext::load(dir.path().to_path_buf(), None).unwrap();
        assert_eq!(ctx.config.results_dir, "out/trx");
    }

    #[test]
    fn test_missing_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CliContext::load(dir.path().to_path_buf(), None).unwrap();
        let err = execute(Command::Summary { report: None }, &ctx, true).unwrap_err();
        assert!(err.to_string().contains("no .trx report found"));
    }
}
