//! Snap 输出解析

use super::{
    find_percent, LineRules, ParseState, Pattern, PhaseRanges, SkipPatterns, StreamParser,
};
use crate::package_manager::types::Package;
use std::collections::HashMap;

/// 默认隐藏的基础 snap 和公共运行时
pub const DEFAULT_SKIP: &[&str] = &[
    "snapd",
    "core",
    "core18",
    "core20",
    "core22",
    "core24",
    "bare",
    "gnome-*",
    "gtk-common-themes",
];

static DOWNLOAD: Pattern = Pattern::new(r#"Download snap "([^"]+)""#);
static INSTALL: Pattern = Pattern::new(
    r#"^(?:Setup|Mount|Copy|Run|Start|Stop)\b.*?(?:snap "([^"]+)"|"([^"]+)" snap)"#,
);
static REFRESHED: Pattern =
    Pattern::new(r"^(\S+)\s+\([^)]+\)\s+(\S+)\s+from\s+.+\s+refreshed");
static NAME_PERCENT: Pattern = Pattern::new(r"(\S+)\s+(\d+)\s*%");

#[derive(Debug, Default)]
pub struct SnapRules;

impl LineRules for SnapRules {
    fn parse_line(&mut self, line: &str, state: &mut ParseState) {
        if line.contains("All snaps up to date") {
            state.mark_nothing_to_do();
            return;
        }

        if let Some(caps) = DOWNLOAD.captures(line) {
            let name = caps[1].to_string();
            match find_percent(line) {
                Some(pct) if pct >= 100.0 => state.download_finished(&name),
                Some(pct) => state.downloading(&name, pct / 100.0),
                None => state.downloading(&name, 0.0),
            }
            return;
        }
        if let Some(caps) = INSTALL.captures(line) {
            if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                let name = name.as_str().to_string();
                if state.in_flight().is_some_and(|current| current != name) {
                    state.complete_in_flight();
                }
                state.installing(&name);
            }
            return;
        }
        // "firefox (latest/stable) 125.0-1 from Mozilla✓ refreshed"
        if let Some(caps) = REFRESHED.captures(line) {
            let name = caps[1].to_string();
            state.complete(&name, None, Some(&caps[2]));
            return;
        }

        if let Some(caps) = NAME_PERCENT.captures(line) {
            let pct: f64 = caps[2].parse().unwrap_or(0.0);
            if pct <= 100.0 && state.package(&caps[1]).is_some() {
                let name = caps[1].to_string();
                if pct >= 100.0 {
                    state.download_finished(&name);
                } else {
                    state.downloading(&name, pct / 100.0);
                }
                return;
            }
        }
        if let Some(pct) = find_percent(line) {
            state.percent(pct);
        }
    }
}

pub fn parser(skip: SkipPatterns) -> StreamParser<SnapRules> {
    StreamParser::new(SnapRules, PhaseRanges::BUNDLED, skip)
}

fn table_rows(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("Name") && !l.contains("All snaps up to date"))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            Some((columns.next()?, columns.next()?))
        })
}

/// 解析 `snap refresh --list`：第一列名字，第二列新版本
pub fn parse_refresh_list(output: &str, skip: &SkipPatterns) -> Vec<Package> {
    table_rows(output)
        .filter(|(name, _)| !skip.matches(name))
        .map(|(name, version)| Package::new(name).with_versions(None, Some(version.to_string())))
        .collect()
}

/// 解析 `snap list`，返回 名字 → 当前版本
pub fn parse_installed(output: &str) -> HashMap<String, String> {
    table_rows(output)
        .map(|(name, version)| (name.to_string(), version.to_string()))
        .collect()
}
