//! Pacman 输出解析

use super::{
    find_percent, parse_progress_info, LineRules, ParseState, Pattern, PhaseRanges, SkipPatterns,
    StreamParser,
};
use crate::package_manager::types::{Package, UpdatePhase};
use std::collections::HashMap;

static INSTALL: Pattern = Pattern::new(
    r"(?i)^\(\s*(\d+)/(\d+)\)\s+(upgrading|installing|reinstalling)\s+(\S+)",
);
static DOWNLOADING: Pattern = Pattern::new(r"^(\S+)\s+downloading\.*$");
static CHECKUPDATES_LINE: Pattern = Pattern::new(r"^(\S+)\s+(\S+)\s+->\s+(\S+)$");
static QU_LINE: Pattern = Pattern::new(r"^(\S+)\s+(\S+)$");

#[derive(Debug, Default)]
pub struct PacmanRules;

impl PacmanRules {
    fn progress_bar(line: &str, state: &mut ParseState) {
        let info = parse_progress_info(line);
        let Some(pct) = info.percent else {
            return;
        };
        if info.label.is_empty() {
            return;
        }
        state.set_transfer(info.speed.clone(), info.eta_duration());
        // 汇总行 "Total ( 2/5)  ..." 直接给出整体下载比例
        if info.label == "Total" {
            state.advance(f64::from(pct) / 100.0);
            return;
        }
        let name = state.resolve(&info.label);
        if pct >= 100 {
            if let Some(bytes) = info.size_bytes() {
                state.set_size(&name, bytes);
            }
            state.download_finished(&name);
        } else {
            state.downloading(&name, f64::from(pct) / 100.0);
        }
    }
}

impl LineRules for PacmanRules {
    fn parse_line(&mut self, line: &str, state: &mut ParseState) {
        if line.to_lowercase().contains("there is nothing to do") {
            state.mark_nothing_to_do();
            return;
        }
        if line.starts_with(":: Synchronizing package databases") {
            state.enter(UpdatePhase::Checking);
            return;
        }
        if line.starts_with(":: Retrieving packages") {
            state.enter(UpdatePhase::Downloading);
            return;
        }
        if line.starts_with(":: Processing package changes") {
            state.enter(UpdatePhase::Installing);
            return;
        }

        if state.phase() == UpdatePhase::Downloading {
            if let Some(caps) = DOWNLOADING.captures(line) {
                let name = state.resolve(&caps[1]);
                state.downloading(&name, 0.0);
                return;
            }
            // "(2/2) checking keys in keyring [###] 100%" 之类的检查步骤不是下载
            if !line.starts_with('(') && line.contains('[') && line.contains('%') {
                Self::progress_bar(line, state);
                return;
            }
        }

        if let Some(caps) = INSTALL.captures(line) {
            if let Ok(total) = caps[2].parse() {
                state.raise_total(total);
            }
            let name = state.resolve(&caps[4]);
            // 下一个包开始意味着上一个包已经完成
            if state.in_flight().is_some_and(|current| current != name) {
                state.complete_in_flight();
            }
            state.installing(&name);
            match find_percent(line) {
                Some(pct) if pct >= 100.0 => {
                    state.complete(&name, None, None);
                }
                Some(pct) => {
                    state.percent(pct);
                }
                None => {}
            }
            return;
        }

        if let Some(pct) = find_percent(line) {
            state.percent(pct);
        }
    }
}

pub fn parser() -> StreamParser<PacmanRules> {
    StreamParser::new(PacmanRules, PhaseRanges::NATIVE, SkipPatterns::none())
}

/// 解析 `checkupdates`（`name old -> new`）或 `pacman -Qu`（`name new`）
pub fn parse_pending(output: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = CHECKUPDATES_LINE.captures(line) {
            packages.push(Package::new(&caps[1]).with_versions(
                Some(caps[2].to_string()),
                Some(caps[3].to_string()),
            ));
        } else if let Some(caps) = QU_LINE.captures(line) {
            packages.push(Package::new(&caps[1]).with_versions(None, Some(caps[2].to_string())));
        }
    }
    packages
}

/// 解析 `pacman -Q <names>`，返回 包名 → 当前版本
pub fn parse_query(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some((parts.next()?.to_string(), parts.next()?.to_string()))
        })
        .collect()
}
