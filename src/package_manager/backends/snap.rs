//! Snap 后端

use super::{fill_old_versions, query, RunContext};
use crate::package_manager::parser::snap;
use crate::package_manager::streaming::CommandSpec;
use crate::package_manager::{
    BackendEnv, BackendKind, CancelSignal, Package, ProgressSink, UpdateBackend, UpdateResult,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct SnapCommands {
    pub list: CommandSpec,
    pub installed: CommandSpec,
    pub upgrade: CommandSpec,
}

impl Default for SnapCommands {
    fn default() -> Self {
        Self {
            list: CommandSpec::new("snap").args(["refresh", "--list"]),
            installed: CommandSpec::new("snap").arg("list"),
            upgrade: CommandSpec::sudo("snap").arg("refresh"),
        }
    }
}

pub struct SnapBackend {
    env: BackendEnv,
    commands: SnapCommands,
}

impl SnapBackend {
    pub fn new(env: BackendEnv) -> Self {
        Self::with_commands(env, SnapCommands::default())
    }

    pub fn with_commands(env: BackendEnv, commands: SnapCommands) -> Self {
        Self { env, commands }
    }
}

#[async_trait]
impl UpdateBackend for SnapBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Snap
    }

    async fn check_available(&self) -> bool {
        self.env.availability.is_available("snap")
    }

    async fn check_updates(&self) -> Vec<Package> {
        match query(self.kind(), &self.commands.list, &[0]).await {
            Some(output) => snap::parse_refresh_list(&output, &self.env.snap_skip),
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
        let mut pending = self.check_updates().await;
        if dry_run {
            return ctx.dry_run(pending);
        }
        if pending.is_empty() {
            return ctx.up_to_date();
        }
        ctx.found(pending.len());
        ctx.open_log(&self.env);

        if let Some(output) = query(self.kind(), &self.commands.installed, &[0]).await {
            fill_old_versions(&mut pending, &snap::parse_installed(&output));
        }

        let mut parser = snap::parser(self.env.snap_skip.clone()).seeded(&pending);
        ctx.execute(&self.commands.upgrade, &mut parser, &mut cancel).await
    }
}
