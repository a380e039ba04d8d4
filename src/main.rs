use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use testlens::cli::{self, CliContext, Command};

/// Test Result Correlation Tool
///
/// CLI 工具，默认输出人类可读格式
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// 输出 JSON 格式 (默认输出人类可读的文本)
    #[arg(long, global = true)]
    json: bool,

    /// 工作区根目录
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// 配置文件 (默认: <root>/testlens.yaml，如存在)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志 (stderr only, stdout 留给命令输出)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let ctx = CliContext::load(args.root, args.config.as_deref())?;
    cli::handle_command(args.command, &ctx, args.json)
}
