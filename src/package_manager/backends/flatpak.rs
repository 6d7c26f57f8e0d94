//! Flatpak 后端
//!
//! `flatpak update` 自己会打印编号的待更新列表，所以不需要预先发现和播种。

use super::{query, RunContext};
use crate::package_manager::parser::flatpak;
use crate::package_manager::streaming::CommandSpec;
use crate::package_manager::{
    BackendEnv, BackendKind, CancelSignal, Package, ProgressSink, UpdateBackend, UpdateResult,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct FlatpakCommands {
    pub list: CommandSpec,
    pub upgrade: CommandSpec,
}

impl Default for FlatpakCommands {
    fn default() -> Self {
        Self {
            list: CommandSpec::new("flatpak").args([
                "remote-ls",
                "--updates",
                "--columns=application,version,branch",
            ]),
            upgrade: CommandSpec::new("flatpak")
                .args(["update", "-y", "--noninteractive"])
                .env("FLATPAK_TTY_MODE", "none"),
        }
    }
}

pub struct FlatpakBackend {
    env: BackendEnv,
    commands: FlatpakCommands,
}

impl FlatpakBackend {
    pub fn new(env: BackendEnv) -> Self {
        Self::with_commands(env, FlatpakCommands::default())
    }

    pub fn with_commands(env: BackendEnv, commands: FlatpakCommands) -> Self {
        Self { env, commands }
    }
}

#[async_trait]
impl UpdateBackend for FlatpakBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Flatpak
    }

    async fn check_available(&self) -> bool {
        self.env.availability.is_available("flatpak")
    }

    async fn check_updates(&self) -> Vec<Package> {
        match query(self.kind(), &self.commands.list, &[0]).await {
            Some(output) => flatpak::parse_remote_ls(&output, &self.env.flatpak_skip),
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
        let mut parser = flatpak::parser(self.env.flatpak_skip.clone());
        ctx.execute(&self.commands.upgrade, &mut parser, &mut cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{collecting_sink, env_with, script};
    use super::*;
    use crate::package_manager::parser::UP_TO_DATE_MESSAGE;
    use crate::package_manager::types::{PackageStatus, UpdatePhase};

    const REMOTE_LS: &str = "org.mozilla.firefox\t125.0.2\tstable\n\
org.gnome.Platform.Locale\t\t46\n\
org.gimp.GIMP\t2.10.38\tstable";

    const UPDATE: &str = "Looking for updates...\n\
\n\
        ID                          Branch    Op\n\
 1.     org.mozilla.firefox         stable    u\n\
 2.     org.gnome.Platform.Locale   46        u\n\
\n\
Downloading org.mozilla.firefox... 60%\n\
Downloading org.mozilla.firefox... 100%\n\
Installing org.mozilla.firefox\n\
Changes complete.";

    fn backend(upgrade: &str, exit_code: i32) -> FlatpakBackend {
        FlatpakBackend::with_commands(
            env_with(&["flatpak"]),
            FlatpakCommands {
                list: CommandSpec::shell(script(REMOTE_LS, 0)),
                upgrade: CommandSpec::shell(script(upgrade, exit_code)),
            },
        )
    }

    #[tokio::test]
    async fn test_check_updates_skips_runtimes() {
        let packages = backend("", 0).check_updates().await;
        let names: Vec<_> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["org.mozilla.firefox", "org.gimp.GIMP"]);
        assert_eq!(packages[0].new_version.as_deref(), Some("125.0.2"));
    }

    #[tokio::test]
    async fn test_dry_run() {
        let (sink, seen) = collecting_sink();
        let result = backend("exit 1", 1)
            .run_update(sink, true, CancelSignal::never())
            .await;
        assert!(result.success);
        assert_eq!(result.package_count(), 2);
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!((last.completed_packages, last.total_packages), (2, 2));
    }

    #[tokio::test]
    async fn test_full_run() {
        let (sink, seen) = collecting_sink();
        let result = backend(UPDATE, 0)
            .run_update(sink, false, CancelSignal::never())
            .await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.package_count(), 1);
        assert_eq!(result.packages[0].name, "org.mozilla.firefox");
        assert_eq!(result.packages[0].status, PackageStatus::Complete);

        let events = seen.lock().unwrap();
        let install = events
            .iter()
            .find(|e| e.phase == UpdatePhase::Installing)
            .unwrap();
        assert!(install.progress >= 0.8);
        assert_eq!(events.last().unwrap().phase, UpdatePhase::Complete);
    }

    #[tokio::test]
    async fn test_numbered_progress_reports_listed_apps() {
        let output = "Looking for updates...\n\
 1.     org.mozilla.firefox         stable    u\n\
 2.     org.gimp.GIMP               stable    u\n\
Updating 1/2... 100%\n\
Updating 2/2... 100%\n\
Changes complete.";
        let (sink, _) = collecting_sink();
        let result = backend(output, 0)
            .run_update(sink, false, CancelSignal::never())
            .await;

        assert!(result.success, "{:?}", result.error_message);
        let names: Vec<_> = result.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["org.mozilla.firefox", "org.gimp.GIMP"]);
        assert!(result.packages.iter().all(|p| p.status == PackageStatus::Complete));
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let (sink, seen) = collecting_sink();
        let result = backend("Looking for updates...\nNothing to do.", 0)
            .run_update(sink, false, CancelSignal::never())
            .await;
        assert!(result.success);
        assert!(result.packages.is_empty());
        let events = seen.lock().unwrap();
        assert_eq!(events.last().unwrap().message.as_deref(), Some(UP_TO_DATE_MESSAGE));
    }

    #[tokio::test]
    async fn test_failure_without_error_line_uses_fallback() {
        let (sink, _) = collecting_sink();
        let result = backend("Looking for updates...", 1)
            .run_update(sink, false, CancelSignal::never())
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("flatpak update failed (exit code 1)")
        );
    }
}
