//! 各后端共用的运行流程片段
//!
//! 后端之间不共享基类，只共享这里的 [`RunContext`] 和几个辅助函数。

pub mod apt;
pub mod dnf;
pub mod flatpak;
pub mod pacman;
pub mod snap;

use super::classify::classify;
use super::parser::{OutputParser, UP_TO_DATE_MESSAGE};
use super::progress::{ProgressReporter, ProgressSink};
use super::streaming::{self, capture, BackendError, CommandSpec, RunOutcome};
use super::types::{BackendKind, Package, Progress, UpdatePhase, UpdateResult};
use super::{BackendEnv, CancelSignal};
use crate::logging::RunLog;
use chrono::{DateTime, Local};
use std::collections::HashMap;

/// 一次 `run_update` 的上下文：上报守卫、日志文件和开始时间。
///
/// 随运行的 future 一起释放，日志在 `Drop` 时刷新。
pub(crate) struct RunContext {
    kind: BackendKind,
    reporter: ProgressReporter,
    log: RunLog,
    start: DateTime<Local>,
}

impl RunContext {
    /// 开始一次运行并报告 CHECKING 0.0
    pub(crate) fn begin(kind: BackendKind, sink: ProgressSink) -> Self {
        let mut ctx = Self {
            kind,
            reporter: ProgressReporter::new(sink, kind.label()),
            log: RunLog::disabled(),
            start: Local::now(),
        };
        ctx.report(
            Progress::new(UpdatePhase::Checking, 0.0)
                .with_message(format!("Checking for {} updates...", kind.label())),
        );
        ctx
    }

    /// 真正执行更新前打开日志文件
    pub(crate) fn open_log(&mut self, env: &BackendEnv) {
        self.log = RunLog::open(env.log_dir.as_deref(), self.kind.key());
    }

    pub(crate) fn report(&mut self, progress: Progress) {
        self.reporter.report(progress);
    }

    /// 发现阶段结束后的 CHECKING 0.05
    pub(crate) fn found(&mut self, count: usize) {
        self.report(
            Progress::new(UpdatePhase::Checking, 0.05)
                .with_counts(0, count)
                .with_message(format!("Found {} update(s)", count)),
        );
    }

    pub(crate) fn dry_run(mut self, packages: Vec<Package>) -> UpdateResult {
        let count = packages.len();
        self.report(Progress::new(UpdatePhase::Complete, 1.0).with_counts(count, count));
        UpdateResult::succeeded(packages, self.start)
    }

    pub(crate) fn up_to_date(self) -> UpdateResult {
        self.succeed(Vec::new(), true)
    }

    pub(crate) fn succeed(mut self, packages: Vec<Package>, nothing_to_do: bool) -> UpdateResult {
        let count = packages.len();
        let mut done = Progress::new(UpdatePhase::Complete, 1.0).with_counts(count, count);
        if nothing_to_do {
            done = done.with_message(UP_TO_DATE_MESSAGE);
        }
        self.report(done);
        log::info!("{}: 更新完成，{} 个包", self.kind, count);
        UpdateResult::succeeded(packages, self.start)
    }

    pub(crate) fn fail(mut self, message: impl Into<String>, packages: Vec<Package>) -> UpdateResult {
        let message = message.into();
        log::warn!("{}: {}", self.kind, message);
        self.log.note(&format!("error: {}", message));
        let progress = self.reporter.progress();
        self.report(Progress::new(UpdatePhase::Error, progress).with_message(message.clone()));
        UpdateResult::failed(message, packages, self.start)
    }

    /// 执行命令，进度事件经上报守卫转发
    pub(crate) async fn stream(
        &mut self,
        spec: &CommandSpec,
        parser: &mut dyn OutputParser,
        cancel: &mut CancelSignal,
    ) -> Result<RunOutcome, BackendError> {
        let reporter = &mut self.reporter;
        let mut on_event = |event: Progress| {
            reporter.report(event);
        };
        streaming::stream(spec, parser, &mut on_event, &mut self.log, cancel).await
    }

    /// 执行升级命令并判定结果
    pub(crate) async fn execute(
        mut self,
        spec: &CommandSpec,
        parser: &mut dyn OutputParser,
        cancel: &mut CancelSignal,
    ) -> UpdateResult {
        match self.stream(spec, parser, cancel).await {
            Err(e) => {
                let packages = parser.finalize(false);
                self.fail(e.to_string(), packages)
            }
            Ok(RunOutcome::Cancelled(reason)) => {
                let packages = parser.finalize(false);
                self.fail(reason.message(), packages)
            }
            Ok(RunOutcome::Exited(code)) => {
                let nothing_to_do = parser.nothing_to_do();
                match classify(self.kind, code, parser.lines(), nothing_to_do) {
                    Ok(()) => {
                        let packages = parser.finalize(true);
                        self.succeed(packages, nothing_to_do)
                    }
                    Err(message) => {
                        let packages = parser.finalize(false);
                        self.fail(message, packages)
                    }
                }
            }
        }
    }
}

/// 执行一条只读查询命令，退出码不在 `accepted` 中或启动失败时返回 `None`
pub(crate) async fn query(kind: BackendKind, spec: &CommandSpec, accepted: &[i32]) -> Option<String> {
    match capture(spec).await {
        Ok(captured) if captured.exited_with(accepted) => Some(captured.stdout),
        Ok(captured) => {
            log::warn!("{}: {} 退出码 {:?}", kind, spec.display(), captured.code);
            None
        }
        Err(e) => {
            log::warn!("{}: {}", kind, e);
            None
        }
    }
}

/// 用查询到的当前版本补全 `old_version`
pub(crate) fn fill_old_versions(packages: &mut [Package], installed: &HashMap<String, String>) {
    for pkg in packages.iter_mut().filter(|p| p.old_version.is_none()) {
        if let Some(version) = installed.get(&pkg.name) {
            pkg.old_version = Some(version.clone());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::types::PackageStatus;

    #[test]
    fn test_fill_old_versions_keeps_known_values() {
        let mut packages = vec![
            Package::new("wget"),
            Package::new("curl").with_versions(Some("8.5".into()), Some("8.6".into())),
        ];
        let installed = HashMap::from([
            ("wget".to_string(), "1.21.3".to_string()),
            ("curl".to_string(), "8.0".to_string()),
        ]);
        fill_old_versions(&mut packages, &installed);
        assert_eq!(packages[0].old_version.as_deref(), Some("1.21.3"));
        assert_eq!(packages[1].old_version.as_deref(), Some("8.5"));
        assert_eq!(packages[1].status, PackageStatus::Pending);
    }

    #[tokio::test]
    async fn test_query_rejects_unexpected_exit_code() {
        let spec = CommandSpec::shell("echo partial; exit 1");
        assert_eq!(query(BackendKind::Dnf, &spec, &[0, 1]).await.as_deref(), Some("partial\n"));
        assert!(query(BackendKind::Dnf, &spec, &[0, 100]).await.is_none());
        assert!(query(BackendKind::Dnf, &CommandSpec::new("/nonexistent/dnf"), &[0]).await.is_none());
    }
}
