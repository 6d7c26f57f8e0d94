mod config;
mod display;
mod logging;
mod orchestrator;
mod package_manager;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use display::ProgressDisplay;
use orchestrator::Orchestrator;
use package_manager::{backend_for, cancel_pair, AvailabilityCache, BackendEnv, BackendKind, CancelReason};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Update every installed package manager at once
#[derive(Debug, Parser)]
#[command(name = "sysupdate", version, about)]
struct Cli {
    /// Show full package lists and info-level logs
    #[arg(short, long)]
    verbose: bool,

    /// Only list pending updates, change nothing
    #[arg(long)]
    dry_run: bool,

    /// Abort all updates after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Do not write per-run output logs
    #[arg(long)]
    no_log: bool,

    /// Config file (default: ~/.config/sysupdate/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// 被中断时的退出码（128 + SIGINT）
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    // 加载配置
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?;

    if !cli.dry_run {
        refresh_sudo()?;
    }

    let log_dir = (!cli.no_log).then(|| config.log_dir.clone());
    let env = BackendEnv::new(Arc::new(AvailabilityCache::new()), log_dir)
        .with_skip(config.skip.flatpak_patterns(), config.skip.snap_patterns());

    let candidates = BackendKind::ALL
        .into_iter()
        .filter(|&kind| config.backends.is_enabled(kind))
        .map(|kind| backend_for(kind, env.clone()))
        .collect();
    let backends = Orchestrator::available(candidates).await;
    if backends.is_empty() {
        eprintln!("No supported package managers found.");
        return Ok(ExitCode::FAILURE);
    }

    let orchestrator = Orchestrator::new(backends, config.cancel_grace());
    log::info!("启用的后端: {:?}", orchestrator.kinds());

    // Ctrl-C 与整体超时都走取消路径
    let (handle, signal) = cancel_pair();
    let deadline = cli
        .timeout
        .filter(|&s| s > 0)
        .map(Duration::from_secs)
        .or_else(|| config.timeout());
    let watcher = tokio::spawn(async move {
        let expired = async {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => handle.cancel(CancelReason::Interrupted),
                Err(e) => log::warn!("无法监听 Ctrl-C: {}", e),
            },
            _ = expired => handle.cancel(CancelReason::TimedOut),
        }
    });

    let display = Arc::new(ProgressDisplay::new(&orchestrator.layout()));
    let summary = orchestrator
        .run(display.clone(), cli.dry_run, signal.clone())
        .await;
    watcher.abort();
    display.finish();

    print!("{}", report::format_summary(&summary, cli.verbose));

    let code = match signal.reason() {
        Some(CancelReason::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        _ if summary.all_succeeded() => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    };
    Ok(code)
}

/// 预先刷新 sudo 凭据，避免密码提示混进进度显示
fn refresh_sudo() -> Result<()> {
    // SAFETY: geteuid 没有前置条件
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }
    duct::cmd!("sudo", "-v")
        .run()
        .context("sudo authentication failed")?;
    Ok(())
}
