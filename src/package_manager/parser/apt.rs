//! APT（apt-get）输出解析

use super::{
    parse_size, strip_arch_qualifier, LineRules, ParseState, Pattern, PhaseRanges, SkipPatterns,
    StreamParser,
};
use crate::package_manager::types::{Package, UpdatePhase};

static UP_TO_DATE: Pattern = Pattern::new(r"(?i)^All packages are up to date");
static SUMMARY: Pattern = Pattern::new(r"^(\d+) upgraded, (\d+) newly installed");
static GET: Pattern = Pattern::new(
    r"^Get:\d+\s+\S+\s+\S+\s+\S+\s+(?P<name>\S+)\s+\S+\s+(?P<version>\S+)(?:\s+\[(?P<size>[^\]]+)\])?",
);
static UNPACK: Pattern =
    Pattern::new(r"^Unpacking\s+(?P<name>\S+)\s+\((?P<new>[^)]+)\)(?:\s+over\s+\((?P<old>[^)]+)\))?");
static SETUP: Pattern = Pattern::new(r"^Setting up\s+(?P<name>\S+)\s+\((?P<version>[^)]+)\)");
static FANCY_PROGRESS: Pattern = Pattern::new(r"^Progress:\s*\[\s*(\d+)%\]");
static TRIGGERS: Pattern = Pattern::new(r"^Processing triggers for\s+(\S+)");
static UPGRADABLE: Pattern = Pattern::new(
    r"^(?P<name>[^/\s]+)/\S+\s+(?P<new>\S+)\s+\S+\s+\[upgradable from:\s+(?P<old>[^\]]+)\]",
);

/// `apt-get full-upgrade` 的逐行规则
#[derive(Debug, Default)]
pub struct AptRules;

impl LineRules for AptRules {
    fn parse_line(&mut self, line: &str, state: &mut ParseState) {
        if let Some(caps) = SUMMARY.captures(line) {
            let upgraded: usize = caps[1].parse().unwrap_or(0);
            let installed: usize = caps[2].parse().unwrap_or(0);
            if upgraded + installed == 0 {
                state.mark_nothing_to_do();
            } else {
                state.set_total(upgraded + installed);
            }
            return;
        }
        if UP_TO_DATE.is_match(line) {
            state.mark_nothing_to_do();
            return;
        }

        if let Some(caps) = GET.captures(line) {
            let name = strip_arch_qualifier(&caps["name"]).to_string();
            state.downloading(&name, 0.0);
            state.set_versions(&name, None, Some(&caps["version"]));
            if let Some(bytes) = caps.name("size").and_then(|m| parse_size(m.as_str())) {
                state.set_size(&name, bytes);
            }
            state.download_finished(&name);
            return;
        }
        if let Some(caps) = UNPACK.captures(line) {
            let name = strip_arch_qualifier(&caps["name"]).to_string();
            state.installing(&name);
            state.set_versions(
                &name,
                caps.name("old").map(|m| m.as_str()),
                Some(&caps["new"]),
            );
            return;
        }
        if let Some(caps) = SETUP.captures(line) {
            let name = strip_arch_qualifier(&caps["name"]).to_string();
            state.complete(&name, None, Some(&caps["version"]));
            return;
        }
        if let Some(caps) = FANCY_PROGRESS.captures(line) {
            if let Ok(pct) = caps[1].parse::<f64>() {
                state.percent(pct);
            }
            return;
        }
        if TRIGGERS.is_match(line) && state.phase() == UpdatePhase::Installing {
            state.note("Processing triggers...");
        }
    }
}

pub fn parser() -> StreamParser<AptRules> {
    StreamParser::new(AptRules, PhaseRanges::NATIVE, SkipPatterns::none())
}

/// 估计的软件源数量，实际行数超过时逐步放大
const ESTIMATED_REPOSITORIES: usize = 10;
/// 刷新阶段自身比例的上限，留给后续的升级阶段
const REFRESH_CAP: f64 = 0.95;

static REPO_LINE: Pattern = Pattern::new(r"^(Hit|Get|Ign|Err):(\d+)\s");

/// `apt-get update` 的软件源刷新进度，只产生 CHECKING 事件
#[derive(Debug)]
pub struct RefreshTracker {
    seen: usize,
    estimate: usize,
}

impl Default for RefreshTracker {
    fn default() -> Self {
        Self {
            seen: 0,
            estimate: ESTIMATED_REPOSITORIES,
        }
    }
}

impl RefreshTracker {
    /// 刷新阶段自身的完成比例，永远不到 1.0
    pub fn fraction(&self) -> f64 {
        (self.seen as f64 / self.estimate as f64).min(REFRESH_CAP)
    }

    fn observe(&mut self, index: usize) {
        if index > self.seen {
            self.seen = index;
        }
        if self.seen >= self.estimate {
            self.estimate = self.seen + 1;
        }
    }
}

impl LineRules for RefreshTracker {
    fn parse_line(&mut self, line: &str, state: &mut ParseState) {
        if state.phase() == UpdatePhase::Idle {
            state.enter(UpdatePhase::Checking);
        }
        if let Some(caps) = REPO_LINE.captures(line) {
            let index: usize = caps[2].parse().unwrap_or(self.seen + 1);
            self.observe(index);
            let message = match &caps[1] {
                "Hit" => "Syncing package sources",
                _ => "Fetching package lists",
            };
            state.note(message);
            state.advance(self.fraction());
        } else if line.starts_with("Reading") {
            state.note("Checking for upgrades");
            state.advance(self.fraction());
        }
    }
}

pub fn refresh_parser() -> StreamParser<RefreshTracker> {
    StreamParser::new(RefreshTracker::default(), PhaseRanges::NATIVE, SkipPatterns::none())
}

/// 解析 `apt list --upgradable`
pub fn parse_upgradable(output: &str) -> Vec<Package> {
    output
        .lines()
        .filter_map(|line| UPGRADABLE.captures(line.trim()))
        .map(|caps| {
            Package::new(&caps["name"]).with_versions(
                Some(caps["old"].trim().to_string()),
                Some(caps["new"].to_string()),
            )
        })
        .collect()
}
