//! DNF 后端（优先 dnf5）

use super::{fill_old_versions, query, RunContext};
use crate::package_manager::parser::dnf;
use crate::package_manager::streaming::CommandSpec;
use crate::package_manager::{
    BackendEnv, BackendKind, CancelSignal, Package, ProgressSink, UpdateBackend, UpdateResult,
};
use async_trait::async_trait;
use std::collections::HashMap;

const BINARIES: [&str; 2] = ["dnf5", "dnf"];
/// `check-update` 在有可用更新时以 100 退出
const CHECK_UPDATE_OK: [i32; 2] = [0, 100];

#[derive(Debug, Clone)]
pub struct DnfCommands {
    pub check: CommandSpec,
    /// 后面会追加包名
    pub installed: CommandSpec,
    pub upgrade: CommandSpec,
}

impl DnfCommands {
    pub fn for_binary(binary: &str) -> Self {
        Self {
            check: CommandSpec::new(binary).arg("check-update"),
            installed: CommandSpec::new(binary).args(["list", "installed"]),
            upgrade: CommandSpec::sudo(binary).args(["upgrade", "-y"]),
        }
    }
}

pub struct DnfBackend {
    env: BackendEnv,
    overrides: Option<DnfCommands>,
}

impl DnfBackend {
    pub fn new(env: BackendEnv) -> Self {
        Self {
            env,
            overrides: None,
        }
    }

    #[cfg(test)]
    pub fn with_commands(env: BackendEnv, commands: DnfCommands) -> Self {
        Self {
            env,
            overrides: Some(commands),
        }
    }

    /// 实际使用的可执行文件名
    pub fn binary(&self) -> &'static str {
        self.env
            .availability
            .first_available(&BINARIES)
            .unwrap_or("dnf")
    }

    fn commands(&self) -> DnfCommands {
        self.overrides
            .clone()
            .unwrap_or_else(|| DnfCommands::for_binary(self.binary()))
    }

    async fn installed_versions(&self, commands: &DnfCommands, names: &[String]) -> HashMap<String, String> {
        let spec = commands.installed.clone().args(names.iter().cloned());
        query(self.kind(), &spec, &[0])
            .await
            .map(|output| dnf::parse_installed(&output))
            .unwrap_or_default()
    }
}

#[async_trait]
impl UpdateBackend for DnfBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dnf
    }

    async fn check_available(&self) -> bool {
        self.env.availability.first_available(&BINARIES).is_some()
    }

    async fn check_updates(&self) -> Vec<Package> {
        match query(self.kind(), &self.commands().check, &CHECK_UPDATE_OK).await {
            Some(output) => dnf::parse_check_update(&output),
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

        let commands = self.commands();
        let names: Vec<String> = pending.iter().map(|p| p.name.clone()).collect();
        let installed = self.installed_versions(&commands, &names).await;
        fill_old_versions(&mut pending, &installed);

        let mut parser = dnf::parser().seeded(&pending);
        ctx.execute(&commands.upgrade, &mut parser, &mut cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{collecting_sink, env_with, script};
    use super::*;
    use crate::package_manager::types::{PackageStatus, UpdatePhase};

    const CHECK_UPDATE: &str = "Last metadata expiration check: 0:12:01 ago.\n\
\n\
bash.x86_64       5.2.26-3.fc40     updates\n\
tzdata.noarch     2024a-5.fc40      updates";

    const INSTALLED: &str = "Installed Packages\n\
bash.x86_64       5.2.26-1.fc40     @anaconda\n\
tzdata.noarch     2024a-1.fc40      @anaconda";

    const UPGRADE: &str = "Dependencies resolved.\n\
Downloading Packages:\n\
(1/2): tzdata-2024a-5.fc40.noarch.rpm     1.2 MB/s | 716 kB     00:00\n\
(2/2): bash-5.2.26-3.fc40.x86_64.rpm      2.1 MB/s | 1.8 MB     00:00\n\
Running transaction\n\
  Upgrading        : tzdata-2024a-5.fc40.noarch     1/4\n\
  Upgrading        : bash-5.2.26-3.fc40.x86_64      2/4\n\
\n\
Upgraded:\n\
  bash-5.2.26-3.fc40.x86_64   tzdata-2024a-5.fc40.noarch\n\
\n\
Complete!";

    fn commands(check_exit: i32, upgrade: &str, upgrade_exit: i32) -> DnfCommands {
        DnfCommands {
            check: CommandSpec::shell(script(CHECK_UPDATE, check_exit)),
            installed: CommandSpec::shell(script(INSTALLED, 0)),
            upgrade: CommandSpec::shell(script(upgrade, upgrade_exit)),
        }
    }

    #[tokio::test]
    async fn test_prefers_dnf5() {
        assert_eq!(DnfBackend::new(env_with(&["dnf", "dnf5"])).binary(), "dnf5");
        assert_eq!(DnfBackend::new(env_with(&["dnf"])).binary(), "dnf");
        assert!(!DnfBackend::new(env_with(&[])).check_available().await);
        assert!(DnfBackend::new(env_with(&["dnf"])).check_available().await);
    }

    #[tokio::test]
    async fn test_check_update_exit_100_is_success() {
        let backend = DnfBackend::with_commands(env_with(&["dnf"]), commands(100, "", 0));
        let packages = backend.check_updates().await;
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "bash");

        let backend = DnfBackend::with_commands(env_with(&["dnf"]), commands(1, "", 0));
        assert!(backend.check_updates().await.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_upgrade() {
        let backend = DnfBackend::with_commands(
            env_with(&["dnf"]),
            DnfCommands {
                check: CommandSpec::shell(script(CHECK_UPDATE, 100)),
                installed: CommandSpec::new("/nonexistent/dnf"),
                upgrade: CommandSpec::new("/nonexistent/dnf"),
            },
        );
        let (sink, seen) = collecting_sink();
        let result = backend.run_update(sink, true, CancelSignal::never()).await;

        assert!(result.success);
        assert_eq!(result.package_count(), 2);
        assert!(result.packages.iter().all(|p| p.status == PackageStatus::Pending));

        let events = seen.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.phase, UpdatePhase::Complete);
        assert_eq!((last.completed_packages, last.total_packages), (2, 2));
    }

    #[tokio::test]
    async fn test_full_run_with_old_versions() {
        let backend = DnfBackend::with_commands(env_with(&["dnf"]), commands(100, UPGRADE, 0));
        let (sink, seen) = collecting_sink();
        let result = backend.run_update(sink, false, CancelSignal::never()).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.package_count(), 2);
        assert!(result.packages.iter().all(|p| p.status == PackageStatus::Complete));
        assert_eq!(result.packages[0].to_string(), "bash: 5.2.26-1.fc40 → 5.2.26-3.fc40");

        let events = seen.lock().unwrap();
        let found = events
            .iter()
            .find(|e| e.message.as_deref() == Some("Found 2 update(s)"))
            .unwrap();
        assert_eq!(found.phase, UpdatePhase::Checking);
        assert_eq!(found.progress, 0.05);
        assert_eq!(found.total_packages, 2);
        assert_eq!(events.last().unwrap().phase, UpdatePhase::Complete);
    }

    #[tokio::test]
    async fn test_no_pending_updates_skips_upgrade() {
        let backend = DnfBackend::with_commands(
            env_with(&["dnf"]),
            DnfCommands {
                check: CommandSpec::shell("exit 0"),
                installed: CommandSpec::new("/nonexistent/dnf"),
                upgrade: CommandSpec::new("/nonexistent/dnf"),
            },
        );
        let (sink, seen) = collecting_sink();
        let result = backend.run_update(sink, false, CancelSignal::never()).await;
        assert!(result.success);
        assert!(result.packages.is_empty());
        let events = seen.lock().unwrap();
        assert_eq!(events.last().unwrap().message.as_deref(), Some("All packages up to date"));
    }

    #[tokio::test]
    async fn test_failure_uses_error_line() {
        let output = "Downloading Packages:\nError: Failed to download metadata for repo 'updates'\n";
        let backend = DnfBackend::with_commands(env_with(&["dnf"]), commands(100, output, 1));
        let (sink, _) = collecting_sink();
        let result = backend.run_update(sink, false, CancelSignal::never()).await;
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Error: Failed to download metadata for repo 'updates'")
        );
    }
}
