//! DNF / dnf5 输出解析

use super::{
    find_percent, parse_progress_info, LineRules, ParseState, Pattern, PhaseRanges, SkipPatterns,
    StreamParser,
};
use crate::package_manager::types::{Package, UpdatePhase};
use std::collections::HashMap;

const ARCHES: &[&str] = &[
    "x86_64", "noarch", "i686", "i386", "aarch64", "ppc64le", "s390x", "armv7hl", "src",
];

// dnf4: "(1/5): bash-5.2.26-3.fc40.x86_64.rpm  45% [===  ] 2.3 MB/s | 1.8 MB 00:01"
static DOWNLOAD_V4: Pattern = Pattern::new(r"^\((\d+)/(\d+)\):\s*(\S+)");
// dnf5: "[1/5] bash-0:5.2.26-3.fc40.x86_64  100% | 2.0 MiB/s | 1.8 MiB | 00m01s"
static DOWNLOAD_V5: Pattern = Pattern::new(r"^\[\s*(\d+)/(\d+)\]\s+(\S+-\d\S*)");
// dnf4: "Upgrading        : bash-5.2.26-3.fc40.x86_64     1/10"
static TRANSACTION_V4: Pattern = Pattern::new(
    r"^(?P<verb>Upgrading|Installing|Reinstalling|Cleanup)\s*:\s+(?P<nevra>\S+)(?:\s+(?P<i>\d+)/(?P<n>\d+))?",
);
// dnf5: "[ 3/12] Upgrading bash-0:5.2.26-3.fc40.x86_64  100% | ..."
static TRANSACTION_V5: Pattern = Pattern::new(
    r"^\[\s*(?P<i>\d+)/(?P<n>\d+)\]\s+(?P<verb>Upgrading|Installing|Reinstalling)\s+(?P<nevra>\S+)",
);
static COMPLETED: Pattern = Pattern::new(r"^(?:Upgraded|Installed):\s*(.*)$");

#[derive(Debug, Default)]
pub struct DnfRules {
    in_summary_block: bool,
}

impl DnfRules {
    fn package_name(state: &ParseState, raw: &str) -> String {
        let raw = raw.strip_suffix(".rpm").unwrap_or(raw);
        state.resolve(raw)
    }

    fn download(line: &str, total: &str, file: &str, state: &mut ParseState) {
        if let Ok(total) = total.parse() {
            state.raise_total(total);
        }
        let name = Self::package_name(state, file);
        let info = parse_progress_info(line);
        state.set_transfer(info.speed.clone(), info.eta_duration());
        match info.percent {
            Some(pct) if pct < 100 => state.downloading(&name, f64::from(pct) / 100.0),
            _ => {
                if let Some(bytes) = info.size_bytes() {
                    state.set_size(&name, bytes);
                }
                state.download_finished(&name);
            }
        }
    }

    fn transaction_step(state: &mut ParseState, i: Option<&str>, n: Option<&str>) {
        if let (Some(Ok(i)), Some(Ok(n))) = (i.map(str::parse::<u32>), n.map(str::parse::<u32>)) {
            if n > 0 {
                state.advance(f64::from(i.saturating_sub(1)) / f64::from(n));
            }
        }
    }
}

impl LineRules for DnfRules {
    fn parse_line(&mut self, line: &str, state: &mut ParseState) {
        if line.contains("Nothing to do") {
            state.mark_nothing_to_do();
            return;
        }

        if self.in_summary_block {
            if line == "Complete!" || line.ends_with(':') {
                self.in_summary_block = false;
            } else {
                for nevra in line.split_whitespace() {
                    let name = Self::package_name(state, nevra);
                    state.complete(&name, None, None);
                }
                return;
            }
        }

        if line.starts_with("Downloading Packages") {
            state.enter(UpdatePhase::Downloading);
            return;
        }
        if let Some(caps) = DOWNLOAD_V4.captures(line) {
            Self::download(line, &caps[2], &caps[3], state);
            return;
        }
        if let Some(caps) = DOWNLOAD_V5.captures(line) {
            Self::download(line, &caps[2], &caps[3], state);
            return;
        }

        if let Some(caps) = TRANSACTION_V4
            .captures(line)
            .or_else(|| TRANSACTION_V5.captures(line))
        {
            if &caps["verb"] != "Cleanup" {
                let name = Self::package_name(state, &caps["nevra"]);
                state.installing(&name);
            }
            Self::transaction_step(
                state,
                caps.name("i").map(|m| m.as_str()),
                caps.name("n").map(|m| m.as_str()),
            );
            return;
        }
        if line.starts_with("Running transaction")
            || ((line == "Upgrading:" || line == "Installing:")
                && state.phase() >= UpdatePhase::Downloading)
        {
            state.enter(UpdatePhase::Installing);
            return;
        }

        if let Some(caps) = COMPLETED.captures(line) {
            let rest = caps[1].trim();
            if rest.is_empty() {
                self.in_summary_block = true;
            } else {
                for nevra in rest.split_whitespace() {
                    let name = Self::package_name(state, nevra);
                    state.complete(&name, None, None);
                }
            }
            return;
        }

        if let Some(pct) = find_percent(line) {
            state.percent(pct);
        }
    }
}

pub fn parser() -> StreamParser<DnfRules> {
    StreamParser::new(DnfRules::default(), PhaseRanges::NATIVE, SkipPatterns::none())
}

/// `bash.x86_64` → `bash`
pub fn strip_arch(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, arch)) if ARCHES.contains(&arch) => base,
        _ => name,
    }
}

fn is_informational(line: &str) -> bool {
    line.starts_with("Last metadata expiration")
        || line.starts_with("Metadata cache created")
        || line.starts_with("Updating and loading")
        || line.starts_with("Repositories loaded")
}

/// 解析 `dnf check-update` 的输出
pub fn parse_check_update(output: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || is_informational(line) {
            continue;
        }
        // 之后是被替代包列表，不是更新
        if line.starts_with("Obsoleting") {
            break;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || !parts[0].contains('.') {
            continue;
        }
        packages.push(
            Package::new(strip_arch(parts[0])).with_versions(None, Some(parts[1].to_string())),
        );
    }
    packages
}

/// 解析 `dnf list installed`，返回 包名 → 版本
pub fn parse_installed(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_informational(line))
        .filter(|line| !line.starts_with("Installed"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            Some((strip_arch(name).to_string(), version.to_string()))
        })
        .collect()
}
