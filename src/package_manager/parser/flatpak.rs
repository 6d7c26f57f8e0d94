//! Flatpak 输出解析

use super::{
    find_percent, LineRules, ParseState, Pattern, PhaseRanges, SkipPatterns, StreamParser,
};
use crate::package_manager::types::{Package, UpdatePhase};

/// 默认隐藏的运行时、扩展和语言包
pub const DEFAULT_SKIP: &[&str] = &[
    "*Locale*",
    "*Extension*",
    "*Platform*",
    "*GL.*",
    "*Sdk*",
    "*Runtime*",
];

static NUMBERED: Pattern = Pattern::new(r"^\s*(\d+)\.\s+(\S+)\s+(\S+)");
static DOWNLOAD: Pattern = Pattern::new(r"(?:Downloading|Fetching)\s+(\S+)");
static INSTALL: Pattern = Pattern::new(r"^(?:Installing|Updating|Deploying)\s+(\S+)");
static COMPLETED: Pattern = Pattern::new(r"^(?:Updated|Installed)\s+(\S+)");
// "Updating 2/5… ████████ 100%  2.1 MB/s"，序号对应待更新列表
static STEP: Pattern = Pattern::new(r"^(?:Installing|Updating)\s+(\d+)/(\d+)");

/// 规范化应用 ref：去掉 `/arch/branch` 后缀和尾部的 `.`、`…`、`:`。
/// 不含 `.` 的不是应用 ID（如 `appstream`），返回 `None`。
pub fn clean_ref(raw: &str) -> Option<&str> {
    let id = raw.split('/').next().unwrap_or(raw);
    let id = id.trim_end_matches(['.', '…', ':']);
    if id.contains('.') {
        Some(id)
    } else {
        None
    }
}

#[derive(Debug, Default)]
pub struct FlatpakRules {
    /// 待更新列表中的 ID，按编号顺序，含被跳过的
    listed: Vec<String>,
}

impl FlatpakRules {
    fn listed(&self, ordinal: &str) -> Option<String> {
        let i = ordinal.parse::<usize>().ok()?.checked_sub(1)?;
        self.listed.get(i).cloned()
    }
}

impl LineRules for FlatpakRules {
    fn parse_line(&mut self, line: &str, state: &mut ParseState) {
        if line.contains("Nothing to do") {
            state.mark_nothing_to_do();
            return;
        }
        if line.starts_with("Looking for updates") {
            state.enter(UpdatePhase::Checking);
            return;
        }
        // 待更新列表：" 1.  org.mozilla.firefox  stable  u"
        if let Some(caps) = NUMBERED.captures(line) {
            if let Some(id) = clean_ref(&caps[2]) {
                self.listed.push(id.to_string());
                state.expect(Package::new(id).with_versions(None, Some(caps[3].to_string())));
            }
            return;
        }

        if let Some(caps) = DOWNLOAD.captures(line) {
            if let Some(id) = clean_ref(&caps[1]) {
                let id = id.to_string();
                match find_percent(line) {
                    Some(pct) if pct >= 100.0 => state.download_finished(&id),
                    Some(pct) => state.downloading(&id, pct / 100.0),
                    None => state.downloading(&id, 0.0),
                }
                return;
            }
        }
        if let Some(id) = STEP.captures(line).and_then(|caps| self.listed(&caps[1])) {
            if state.in_flight().is_some_and(|current| current != id) {
                state.complete_in_flight();
            }
            match find_percent(line) {
                Some(pct) if pct >= 100.0 => {
                    state.complete(&id, None, None);
                }
                _ => state.installing(&id),
            }
            return;
        }
        if let Some(caps) = INSTALL.captures(line) {
            if let Some(id) = clean_ref(&caps[1]) {
                let id = id.to_string();
                if state.in_flight().is_some_and(|current| current != id) {
                    state.complete_in_flight();
                }
                state.installing(&id);
                return;
            }
        }
        if let Some(caps) = COMPLETED.captures(line) {
            if let Some(id) = clean_ref(&caps[1]) {
                let id = id.to_string();
                state.complete(&id, None, None);
                return;
            }
        }
        if line.starts_with("Changes complete") {
            state.complete_in_flight();
            return;
        }

        if let Some(pct) = find_percent(line) {
            state.percent(pct);
        }
    }
}

pub fn parser(skip: SkipPatterns) -> StreamParser<FlatpakRules> {
    StreamParser::new(FlatpakRules::default(), PhaseRanges::BUNDLED, skip).promoting_expected()
}

/// 解析 `flatpak remote-ls --updates --columns=application,version,branch`
///
/// 版本列为空时用分支名代替。
pub fn parse_remote_ls(output: &str, skip: &SkipPatterns) -> Vec<Package> {
    let mut packages = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let columns: Vec<&str> = if line.contains('\t') {
            line.split('\t').map(str::trim).collect()
        } else {
            line.split_whitespace().collect()
        };
        let Some(id) = columns.first().and_then(|c| clean_ref(c)) else {
            continue;
        };
        if skip.matches(id) {
            continue;
        }
        let version = columns
            .iter()
            .skip(1)
            .copied()
            .find(|c| !c.is_empty())
            .map(str::to_string);
        packages.push(Package::new(id).with_versions(None, version));
    }
    packages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::parser::OutputParser;
    use crate::package_manager::types::PackageStatus;

    const UPDATE_OUTPUT: &str = "
Looking for updates...

        ID                                      Branch         Op
 1.     org.mozilla.firefox                     stable         u
 2.     org.gimp.GIMP                           stable         u
 3.     org.libreoffice.LibreOffice             stable         u
 4.     org.freedesktop.Platform.GL.default    22.08          u
 5.     org.gnome.Platform.Locale              45             u

Downloading org.mozilla.firefox... 45%
Downloading org.mozilla.firefox... 100%
Installing org.mozilla.firefox
Downloading org.gimp.GIMP... 100%
Installing org.gimp.GIMP
Downloading org.libreoffice.LibreOffice... 100%
Installing org.libreoffice.LibreOffice

Changes complete.
";

    fn default_parser() -> StreamParser<FlatpakRules> {
        parser(SkipPatterns::new(DEFAULT_SKIP))
    }

    #[test]
    fn test_update_output() {
        let mut parser = default_parser();
        let mut events = parser.feed(UPDATE_OUTPUT.as_bytes());
        events.extend(parser.finish());

        assert_eq!(parser.state().total(), 3);
        assert_eq!(parser.state().skipped().len(), 2);

        let first_download = events
            .iter()
            .find(|e| e.phase == UpdatePhase::Downloading && e.current_package.is_some())
            .unwrap();
        assert_eq!(first_download.current_package.as_deref(), Some("org.mozilla.firefox"));

        let last = events.last().unwrap();
        assert_eq!(last.completed_packages, 3);
        assert_eq!(last.progress, 1.0);

        let packages = parser.finalize(true);
        let names: Vec<_> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["org.mozilla.firefox", "org.gimp.GIMP", "org.libreoffice.LibreOffice"]
        );
        assert!(packages.iter().all(|p| p.status == PackageStatus::Complete));
        assert_eq!(packages[0].new_version.as_deref(), Some("stable"));
    }

    #[test]
    fn test_numbered_steps_complete_listed_apps() {
        let mut parser = default_parser();
        parser.feed(
            b" 1. org.mozilla.firefox stable u\n 2. org.gimp.GIMP stable u\n\
              Updating 1/2... 100%\nUpdating 2/2... 40%\n",
        );
        assert_eq!(parser.state().completed(), 1);
        assert_eq!(parser.state().in_flight(), Some("org.gimp.GIMP"));

        parser.feed(b"Updating 2/2... 100%\nChanges complete.\n");
        let packages = parser.finalize(true);
        assert_eq!(packages.len(), 2);
        assert!(packages.iter().all(|p| p.status == PackageStatus::Complete));
    }

    #[test]
    fn test_listed_apps_complete_on_success() {
        let mut parser = default_parser();
        parser.feed(b" 1. org.mozilla.firefox stable u\n 2. org.gimp.GIMP stable u\nChanges complete.\n");
        let packages = parser.finalize(true);
        let names: Vec<_> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["org.mozilla.firefox", "org.gimp.GIMP"]);
        assert!(packages.iter().all(|p| p.status == PackageStatus::Complete));
    }

    #[test]
    fn test_listed_apps_not_reported_on_failure() {
        let mut parser = default_parser();
        parser.feed(b" 1. org.mozilla.firefox stable u\nerror: Unable to connect\n");
        assert!(parser.finalize(false).is_empty());
    }

    #[test]
    fn test_bundled_ranges() {
        let mut parser = default_parser();
        let events = parser.feed(b" 1. org.app.One stable u\nInstalling org.app.One\n");
        let install = events
            .iter()
            .find(|e| e.phase == UpdatePhase::Installing)
            .unwrap();
        assert_eq!(install.progress, 0.8);
    }

    #[test]
    fn test_nothing_to_do() {
        let mut parser = default_parser();
        parser.feed(b"\nLooking for updates...\nNothing to do.\n");
        assert!(parser.nothing_to_do());
        assert!(parser.finalize(true).is_empty());
    }

    #[test]
    fn test_skipped_runtime_never_reported() {
        let mut parser = default_parser();
        parser.feed(b"Updating org.gnome.Platform/x86_64/45\nUpdating appstream data for remote flathub\n");
        assert!(parser.finalize(true).is_empty());
        assert_eq!(parser.state().skipped(), ["org.gnome.Platform"]);
    }

    #[test]
    fn test_clean_ref() {
        assert_eq!(clean_ref("org.mozilla.firefox..."), Some("org.mozilla.firefox"));
        assert_eq!(clean_ref("org.gimp.GIMP/x86_64/stable"), Some("org.gimp.GIMP"));
        assert_eq!(clean_ref("org.app.Name…"), Some("org.app.Name"));
        assert_eq!(clean_ref("appstream"), None);
    }

    #[test]
    fn test_parse_remote_ls() {
        let output = "org.mozilla.firefox\t125.0.1\tstable\n\
                      org.gnome.Platform\t\t46\n\
                      org.gimp.GIMP\t\tstable\n";
        let packages = parse_remote_ls(output, &SkipPatterns::new(DEFAULT_SKIP));
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].new_version.as_deref(), Some("125.0.1"));
        assert_eq!(packages[1].name, "org.gimp.GIMP");
        assert_eq!(packages[1].new_version.as_deref(), Some("stable"));
    }
}
