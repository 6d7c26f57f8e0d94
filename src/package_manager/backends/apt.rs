//! APT 后端：先 `apt-get update` 刷新软件源，再 `apt-get full-upgrade`

use super::{query, RunContext};
use crate::package_manager::parser::apt;
use crate::package_manager::streaming::{BackendError, CommandSpec, ReadMode, RunOutcome};
use crate::package_manager::{
    BackendEnv, BackendKind, CancelSignal, Package, ProgressSink, UpdateBackend, UpdateResult,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct AptCommands {
    pub list: CommandSpec,
    pub refresh: CommandSpec,
    pub upgrade: CommandSpec,
}

impl Default for AptCommands {
    fn default() -> Self {
        Self {
            list: CommandSpec::new("apt").args(["list", "--upgradable"]),
            refresh: CommandSpec::sudo("apt-get")
                .arg("update")
                .read_mode(ReadMode::Lines),
            upgrade: CommandSpec::sudo("apt-get")
                .args(["full-upgrade", "-y"])
                .env("DEBIAN_FRONTEND", "noninteractive")
                .read_mode(ReadMode::Lines),
        }
    }
}

pub struct AptBackend {
    env: BackendEnv,
    commands: AptCommands,
}

impl AptBackend {
    pub fn new(env: BackendEnv) -> Self {
        Self::with_commands(env, AptCommands::default())
    }

    pub fn with_commands(env: BackendEnv, commands: AptCommands) -> Self {
        Self { env, commands }
    }

    /// 刷新软件源；失败时返回最终的错误信息
    async fn refresh(&self, ctx: &mut RunContext, cancel: &mut CancelSignal) -> Result<(), String> {
        let mut tracker = apt::refresh_parser();
        match ctx.stream(&self.commands.refresh, &mut tracker, cancel).await {
            Ok(RunOutcome::Exited(Some(0))) => Ok(()),
            Ok(RunOutcome::Cancelled(reason)) => Err(reason.message().to_string()),
            Ok(RunOutcome::Exited(code)) => {
                log::warn!("apt-get update 退出码 {:?}", code);
                Err(BackendError::RefreshFailed.to_string())
            }
            Err(e) => {
                log::warn!("apt-get update 执行失败: {}", e);
                Err(BackendError::RefreshFailed.to_string())
            }
        }
    }
}

#[async_trait]
impl UpdateBackend for AptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Apt
    }

    async fn check_available(&self) -> bool {
        self.env.availability.is_available("apt")
    }

    async fn check_updates(&self) -> Vec<Package> {
        match query(self.kind(), &self.commands.list, &[0]).await {
            Some(output) => apt::parse_upgradable(&output),
            None => Vec::new(),
        }
    }

    async fn run_update(
        &self,
        sink: ProgressSink,
        dry_run: bool,
        mut cancel: CancelSignal,
    ) -> UpdateResult {
        let mut ctx = RunContext::begin(self.kind(), sink);
        if dry_run {
            let packages = self.check_updates().await;
            return ctx.dry_run(packages);
        }

        ctx.open_log(&self.env);
        if let Err(message) = self.refresh(&mut ctx, &mut cancel).await {
            return ctx.fail(message, Vec::new());
        }

        let mut parser = apt::parser();
        ctx.execute(&self.commands.upgrade, &mut parser, &mut cancel).await
    }
}
