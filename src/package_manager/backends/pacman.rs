//! Pacman 后端

use super::{fill_old_versions, query, RunContext};
use crate::package_manager::parser::pacman;
use crate::package_manager::streaming::CommandSpec;
use crate::package_manager::{
    BackendEnv, BackendKind, CancelSignal, Package, ProgressSink, UpdateBackend, UpdateResult,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// checkupdates 无更新时退出 2，`pacman -Qu` 无更新时退出 1
const QUERY_OK: [i32; 3] = [0, 1, 2];

#[derive(Debug, Clone)]
pub struct PacmanCommands {
    pub checkupdates: CommandSpec,
    /// checkupdates 不可用时的后备，可能基于过期的同步数据库
    pub query_upgrades: CommandSpec,
    /// 后面会追加包名
    pub query_installed: CommandSpec,
    pub upgrade: CommandSpec,
}

impl Default for PacmanCommands {
    fn default() -> Self {
        Self {
            checkupdates: CommandSpec::new("checkupdates"),
            query_upgrades: CommandSpec::new("pacman").arg("-Qu"),
            query_installed: CommandSpec::new("pacman").arg("-Q"),
            upgrade: CommandSpec::sudo("pacman").args(["-Syu", "--noconfirm", "--color", "never"]),
        }
    }
}

pub struct PacmanBackend {
    env: BackendEnv,
    commands: PacmanCommands,
}

impl PacmanBackend {
    pub fn new(env: BackendEnv) -> Self {
        Self::with_commands(env, PacmanCommands::default())
    }

    pub fn with_commands(env: BackendEnv, commands: PacmanCommands) -> Self {
        Self { env, commands }
    }

    async fn installed_versions(&self, names: &[String]) -> HashMap<String, String> {
        let spec = self.commands.query_installed.clone().args(names.iter().cloned());
        query(self.kind(), &spec, &[0, 1])
            .await
            .map(|output| pacman::parse_query(&output))
            .unwrap_or_default()
    }
}

#[async_trait]
impl UpdateBackend for PacmanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pacman
    }

    async fn check_available(&self) -> bool {
        self.env.availability.is_available("pacman")
    }

    async fn check_updates(&self) -> Vec<Package> {
        let spec = if self.env.availability.is_available("checkupdates") {
            &self.commands.checkupdates
        } else {
            &self.commands.query_upgrades
        };
        match query(self.kind(), spec, &QUERY_OK).await {
            Some(output) => pacman::parse_pending(&output),
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

        // checkupdates 已给出旧版本，`pacman -Qu` 的后备格式没有
        if pending.iter().any(|p| p.old_version.is_none()) {
            let names: Vec<String> = pending.iter().map(|p| p.name.clone()).collect();
            let installed = self.installed_versions(&names).await;
            fill_old_versions(&mut pending, &installed);
        }

        let mut parser = pacman::parser().seeded(&pending);
        ctx.execute(&self.commands.upgrade, &mut parser, &mut cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{collecting_sink, env_with, script};
    use super::*;
    use crate::package_manager::types::{PackageStatus, UpdatePhase};

    const UPGRADE: &str = ":: Starting full system upgrade...\n\
:: Retrieving packages...\n\
 wget-1.21.4-1-x86_64  768.0 KiB  1.25 MiB/s 00:00 [######################] 100%\n\
:: Processing package changes...\n\
(1/1) upgrading wget                               [######################] 100%";

    fn commands(upgrade: &str, upgrade_exit: i32) -> PacmanCommands {
        PacmanCommands {
            checkupdates: CommandSpec::shell(script("wget 1.21.3-1 -> 1.21.4-1", 0)),
            query_upgrades: CommandSpec::shell(script("wget 1.21.4-1", 0)),
            query_installed: CommandSpec::shell(script("wget 1.21.3-1", 0)),
            upgrade: CommandSpec::shell(script(upgrade, upgrade_exit)),
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_pacman_qu() {
        let with_checkupdates =
            PacmanBackend::with_commands(env_with(&["pacman", "checkupdates"]), commands("", 0));
        let packages = with_checkupdates.check_updates().await;
        assert_eq!(packages[0].old_version.as_deref(), Some("1.21.3-1"));

        let without = PacmanBackend::with_commands(env_with(&["pacman"]), commands("", 0));
        let packages = without.check_updates().await;
        assert_eq!(packages.len(), 1);
        assert!(packages[0].old_version.is_none());
    }

    #[tokio::test]
    async fn test_no_updates_exit_code_is_not_an_error() {
        let mut table = commands("", 0);
        table.checkupdates = CommandSpec::shell("exit 2");
        let backend = PacmanBackend::with_commands(env_with(&["pacman", "checkupdates"]), table);
        assert!(backend.check_updates().await.is_empty());

        let (sink, _) = collecting_sink();
        let result = backend.run_update(sink, false, CancelSignal::never()).await;
        assert!(result.success);
        assert!(result.packages.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_upgrade() {
        let table = PacmanCommands {
            upgrade: CommandSpec::new("/nonexistent/pacman"),
            query_installed: CommandSpec::new("/nonexistent/pacman"),
            ..commands("", 0)
        };
        let backend = PacmanBackend::with_commands(env_with(&["pacman", "checkupdates"]), table);
        let (sink, seen) = collecting_sink();
        let result = backend.run_update(sink, true, CancelSignal::never()).await;

        assert!(result.success);
        assert_eq!(result.package_count(), 1);
        assert!(result.packages.iter().all(|p| p.status == PackageStatus::Pending));

        let events = seen.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.phase, UpdatePhase::Complete);
        assert_eq!((last.completed_packages, last.total_packages), (1, 1));
    }

    #[tokio::test]
    async fn test_full_run_fills_old_version_from_query() {
        let backend = PacmanBackend::with_commands(env_with(&["pacman"]), commands(UPGRADE, 0));
        let (sink, seen) = collecting_sink();
        let result = backend.run_update(sink, false, CancelSignal::never()).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.packages.len(), 1);
        assert_eq!(result.packages[0].status, PackageStatus::Complete);
        assert_eq!(result.packages[0].to_string(), "wget: 1.21.3-1 → 1.21.4-1");

        let events = seen.lock().unwrap();
        assert!(events.iter().any(|e| e.phase == UpdatePhase::Downloading));
        assert_eq!(events.last().unwrap().phase, UpdatePhase::Complete);
    }

    #[tokio::test]
    async fn test_failure_reports_pacman_error() {
        let output = ":: Starting full system upgrade...\n\
error: failed to init transaction (unable to lock database)\n\
error: could not lock database: File exists";
        let backend = PacmanBackend::with_commands(env_with(&["pacman"]), commands(output, 1));
        let (sink, _) = collecting_sink();
        let result = backend.run_update(sink, false, CancelSignal::never()).await;
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("error: could not lock database: File exists")
        );
    }
}
