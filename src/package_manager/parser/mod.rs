//! 输出解析的公共部分：行切分、阶段状态机、跳过规则、进度行分词
//!
//! 每个后端只需实现 [`LineRules`]，其余（缓冲、阶段单调、包状态、
//! 进度换算、错误行保留）都在这里完成。

pub mod apt;
pub mod dnf;
pub mod flatpak;
pub mod pacman;
pub mod snap;

use super::progress::ProgressRange;
use super::types::{Package, PackageStatus, Progress, UpdatePhase};
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;
use std::time::Duration;

/// 为错误提取保留的最近输出行数
pub const MAX_RETAINED_LINES: usize = 2000;

/// 单行的最大字节数，超过后强制切分
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// 无更新时统一使用的提示
pub const UP_TO_DATE_MESSAGE: &str = "All packages up to date";

/// 清理终端输出中的 ANSI 转义序列和控制字符。
///
/// 输入是已经按 `\n` / `\r` 切好的单行。
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                // CSI: ESC [ ... 字母
                Some('[') => {
                    chars.next();
                    for next in chars.by_ref() {
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
                // OSC: ESC ] ... BEL 或 ESC \
                Some(']') => {
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == '\x07' {
                            break;
                        }
                        if next == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                // 字符集切换 ESC ( B 之类
                Some('(') | Some(')') => {
                    chars.next();
                    chars.next();
                }
                Some(_) => {
                    chars.next();
                }
                None => {}
            },
            '\t' => result.push(' '),
            c if c.is_control() => {}
            _ => result.push(c),
        }
    }

    result
}

/// 按 `\n` 和 `\r` 切分字节流，跨块保留未结束的尾部片段。
///
/// 在字节层面切分，因此被块边界截断的多字节 UTF-8 字符不会损坏。
/// 没有换行的片段超过 [`MAX_LINE_BYTES`] 时强制作为一行输出。
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个块，返回其中所有完整的非空行
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                let raw = std::mem::take(&mut self.pending);
                if let Some(line) = decode_line(&raw) {
                    lines.push(line);
                }
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_LINE_BYTES {
                    let raw = std::mem::take(&mut self.pending);
                    if let Some(line) = decode_line(&raw) {
                        lines.push(line);
                    }
                }
            }
        }
        lines
    }

    /// 输出结束时取出剩余片段
    pub fn flush(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        decode_line(&raw)
    }

    #[cfg(test)]
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(raw);
    let cleaned = clean_terminal_output(&text);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// 延迟编译的内置正则。编译失败时记录错误并视为永不匹配。
pub struct Pattern {
    source: &'static str,
    regex: OnceLock<Option<Regex>>,
}

impl Pattern {
    pub const fn new(source: &'static str) -> Self {
        Self {
            source,
            regex: OnceLock::new(),
        }
    }

    fn regex(&self) -> Option<&Regex> {
        self.regex
            .get_or_init(|| match Regex::new(self.source) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::error!("内置正则编译失败 {}: {}", self.source, e);
                    None
                }
            })
            .as_ref()
    }

    pub fn captures<'h>(&self, line: &'h str) -> Option<Captures<'h>> {
        self.regex()?.captures(line)
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex().is_some_and(|re| re.is_match(line))
    }
}

// ========== 跳过规则 ==========

#[derive(Debug, Clone, PartialEq, Eq)]
enum SkipRule {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl SkipRule {
    fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }
        let leading = pattern.starts_with('*');
        let trailing = pattern.len() > 1 && pattern.ends_with('*');
        let inner = pattern.trim_matches('*').to_string();
        Some(match (leading, trailing) {
            (true, true) => Self::Contains(inner),
            (true, false) => Self::Suffix(inner),
            (false, true) => Self::Prefix(inner),
            (false, false) => Self::Exact(inner),
        })
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(s) => name == s,
            Self::Prefix(s) => name.starts_with(s.as_str()),
            Self::Suffix(s) => name.ends_with(s.as_str()),
            Self::Contains(s) => name.contains(s.as_str()),
        }
    }
}

/// 需要从用户可见结果中隐藏的子包（运行时、语言包、基础 snap 等）。
///
/// 语法：`foo` 精确匹配，`foo*` 前缀，`*foo` 后缀，`*foo*` 子串。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipPatterns {
    rules: Vec<SkipRule>,
}

impl SkipPatterns {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rules: patterns
                .into_iter()
                .filter_map(|p| SkipRule::parse(p.as_ref()))
                .collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(name))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ========== 阶段区间 ==========

/// 各阶段在单个后端 `[0,1]` 进度轴上占用的子区间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseRanges {
    pub checking: ProgressRange,
    pub downloading: ProgressRange,
    pub installing: ProgressRange,
}

impl PhaseRanges {
    /// 系统包管理器：下载与安装大致对半
    pub const NATIVE: PhaseRanges = PhaseRanges {
        checking: ProgressRange { start: 0.0, end: 0.1 },
        downloading: ProgressRange { start: 0.1, end: 0.5 },
        installing: ProgressRange { start: 0.5, end: 1.0 },
    };

    /// Flatpak / Snap：下载占大头，部署很快
    pub const BUNDLED: PhaseRanges = PhaseRanges {
        checking: ProgressRange { start: 0.0, end: 0.1 },
        downloading: ProgressRange { start: 0.1, end: 0.8 },
        installing: ProgressRange { start: 0.8, end: 1.0 },
    };

    pub fn range(&self, phase: UpdatePhase) -> ProgressRange {
        match phase {
            UpdatePhase::Idle | UpdatePhase::Checking => self.checking,
            UpdatePhase::Downloading => self.downloading,
            UpdatePhase::Installing => self.installing,
            UpdatePhase::Complete | UpdatePhase::Error => ProgressRange { start: 1.0, end: 1.0 },
        }
    }
}

impl Default for PhaseRanges {
    fn default() -> Self {
        Self::NATIVE
    }
}

// ========== 解析状态 ==========

/// 所有后端共用的解析状态机。
///
/// - 阶段只前进，`Complete` 之后不再产生事件
/// - 阶段内进度不回退，换阶段时重置到新阶段的起点
/// - 包状态只前进
#[derive(Debug)]
pub struct ParseState {
    ranges: PhaseRanges,
    skip: SkipPatterns,
    phase: UpdatePhase,
    progress: f64,
    total: usize,
    downloaded: usize,
    completed: usize,
    fetched: HashSet<String>,
    current: Option<String>,
    speed: Option<String>,
    eta: Option<Duration>,
    message: Option<String>,
    packages: Vec<Package>,
    index: HashMap<String, usize>,
    skipped: Vec<String>,
    lines: VecDeque<String>,
    nothing_to_do: bool,
    /// 成功结束时把仍在等待的已登记包也记为完成
    promote_expected: bool,
    events: Vec<Progress>,
}

impl ParseState {
    pub fn new(ranges: PhaseRanges, skip: SkipPatterns) -> Self {
        Self {
            ranges,
            skip,
            phase: UpdatePhase::Idle,
            progress: 0.0,
            total: 0,
            downloaded: 0,
            completed: 0,
            fetched: HashSet::new(),
            current: None,
            speed: None,
            eta: None,
            message: None,
            packages: Vec::new(),
            index: HashMap::new(),
            skipped: Vec::new(),
            lines: VecDeque::new(),
            nothing_to_do: false,
            promote_expected: false,
            events: Vec::new(),
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    pub fn nothing_to_do(&self) -> bool {
        self.nothing_to_do
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.index.get(name).map(|&i| &self.packages[i])
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }


    pub fn lines(&self) -> &VecDeque<String> {
        &self.lines
    }

    fn record_line(&mut self, line: &str) {
        if self.lines.len() == MAX_RETAINED_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn take_events(&mut self) -> Vec<Progress> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self) {
        let completed = if self.phase == UpdatePhase::Downloading {
            self.downloaded
        } else {
            self.completed
        };
        self.events.push(Progress {
            phase: self.phase,
            progress: self.progress,
            total_packages: self.total.max(completed),
            completed_packages: completed,
            current_package: self.current.clone(),
            speed: self.speed.clone(),
            eta: self.eta,
            message: self.message.clone(),
        });
    }

    /// 进入新阶段；倒退或终止后的请求被忽略
    pub fn enter(&mut self, phase: UpdatePhase) -> bool {
        if phase == UpdatePhase::Idle || !self.phase.can_advance_to(phase) {
            return false;
        }
        self.phase = phase;
        self.progress = match phase {
            UpdatePhase::Complete => 1.0,
            UpdatePhase::Error => self.progress,
            _ => self.ranges.range(phase).start,
        };
        self.speed = None;
        self.eta = None;
        self.message = match phase {
            UpdatePhase::Checking => Some("Checking for updates...".to_string()),
            UpdatePhase::Downloading => Some("Downloading packages...".to_string()),
            UpdatePhase::Installing => Some("Installing packages...".to_string()),
            _ => None,
        };
        self.emit();
        true
    }

    /// 在当前阶段内推进到 `fraction`（阶段内的局部比例）
    pub fn advance(&mut self, fraction: f64) -> bool {
        if self.phase == UpdatePhase::Idle || self.phase.is_terminal() {
            return false;
        }
        let value = self.ranges.range(self.phase).scale(fraction);
        if value <= self.progress {
            return false;
        }
        self.progress = value;
        self.emit();
        true
    }

    fn phase_fraction(&self, done: usize, partial: f64) -> f64 {
        let partial = partial.clamp(0.0, 1.0);
        if self.total == 0 {
            return partial;
        }
        ((done as f64 + partial) / self.total as f64).min(1.0)
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    /// 只在新值更大时更新总数（`(i/n)` 之类的计数）
    pub fn raise_total(&mut self, total: usize) {
        if total > self.total {
            self.total = total;
        }
    }

    fn skip_if_matched(&mut self, name: &str) -> bool {
        if !self.skip.matches(name) {
            return false;
        }
        if !self.skipped.iter().any(|s| s == name) {
            log::debug!("跳过子包 {}", name);
            self.skipped.push(name.to_string());
        }
        true
    }

    fn track(&mut self, name: &str) -> Option<usize> {
        if self.skip_if_matched(name) {
            return None;
        }
        if let Some(&i) = self.index.get(name) {
            return Some(i);
        }
        self.packages.push(Package::new(name));
        let i = self.packages.len() - 1;
        self.index.insert(name.to_string(), i);
        Some(i)
    }

    /// 登记一个待更新的包（来自发现阶段或工具自己打印的列表）。
    ///
    /// 新登记的包计入总数；返回是否为新包。
    pub fn expect(&mut self, package: Package) -> bool {
        if self.skip_if_matched(&package.name) {
            return false;
        }
        if let Some(&i) = self.index.get(&package.name) {
            let known = &mut self.packages[i];
            if package.old_version.is_some() {
                known.old_version = package.old_version;
            }
            if package.new_version.is_some() {
                known.new_version = package.new_version;
            }
            if package.size.is_some() {
                known.size = package.size;
            }
            return false;
        }
        self.index.insert(package.name.clone(), self.packages.len());
        self.packages.push(Package {
            status: PackageStatus::Pending,
            ..package
        });
        self.total += 1;
        true
    }

    pub fn set_versions(&mut self, name: &str, old: Option<&str>, new: Option<&str>) {
        if let Some(&i) = self.index.get(name) {
            let pkg = &mut self.packages[i];
            if let Some(old) = old {
                pkg.old_version = Some(old.to_string());
            }
            if let Some(new) = new {
                pkg.new_version = Some(new.to_string());
            }
        }
    }

    pub fn set_size(&mut self, name: &str, bytes: u64) {
        if let Some(&i) = self.index.get(name) {
            self.packages[i].size = Some(bytes);
        }
    }

    pub fn set_transfer(&mut self, speed: Option<String>, eta: Option<Duration>) {
        if speed.is_some() {
            self.speed = speed;
        }
        if eta.is_some() {
            self.eta = eta;
        }
    }

    /// 更新提示信息；阶段已开始时立即发出
    pub fn note(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
        if self.phase != UpdatePhase::Idle && !self.phase.is_terminal() {
            self.emit();
        }
    }

    fn set_current(&mut self, name: &str) -> bool {
        if self.current.as_deref() == Some(name) {
            return false;
        }
        self.current = Some(name.to_string());
        true
    }

    /// 按已知包名解析带版本号的名字：`bash-5.2.26-3.fc40.x86_64` → `bash`
    pub fn resolve(&self, raw: &str) -> String {
        if self.index.contains_key(raw) {
            return raw.to_string();
        }
        let best = self
            .index
            .keys()
            .filter(|name| {
                raw.len() > name.len() + 1
                    && raw.starts_with(name.as_str())
                    && raw[name.len()..].starts_with('-')
                    && raw[name.len() + 1..].starts_with(|c: char| c.is_ascii_digit())
            })
            .max_by_key(|name| name.len());
        match best {
            Some(name) => name.clone(),
            None => strip_version(raw).to_string(),
        }
    }

    /// 某个包开始（或继续）下载；`partial` 为该包自身的完成比例
    pub fn downloading(&mut self, name: &str, partial: f64) {
        let Some(i) = self.track(name) else {
            return;
        };
        if self.phase < UpdatePhase::Downloading {
            self.enter(UpdatePhase::Downloading);
        }
        self.packages[i].advance(PackageStatus::Downloading);
        if self.phase != UpdatePhase::Downloading {
            return;
        }
        let changed = self.set_current(name);
        let partial = if self.fetched.contains(name) { 0.0 } else { partial };
        let fraction = self.phase_fraction(self.downloaded, partial);
        if !self.advance(fraction) && changed {
            self.emit();
        }
    }

    pub fn download_finished(&mut self, name: &str) {
        let Some(i) = self.track(name) else {
            return;
        };
        if self.phase < UpdatePhase::Downloading {
            self.enter(UpdatePhase::Downloading);
        }
        self.packages[i].advance(PackageStatus::Downloading);
        if self.fetched.insert(name.to_string()) {
            self.downloaded += 1;
        }
        if self.phase == UpdatePhase::Downloading {
            let changed = self.set_current(name);
            let fraction = self.phase_fraction(self.downloaded, 0.0);
            if !self.advance(fraction) && changed {
                self.emit();
            }
        }
    }

    pub fn installing(&mut self, name: &str) {
        let Some(i) = self.track(name) else {
            return;
        };
        if self.phase < UpdatePhase::Installing {
            self.enter(UpdatePhase::Installing);
        }
        if self.phase != UpdatePhase::Installing {
            return;
        }
        self.packages[i].advance(PackageStatus::Installing);
        let changed = self.set_current(name);
        let fraction = self.phase_fraction(self.completed, 0.0);
        if !self.advance(fraction) && changed {
            self.emit();
        }
    }

    /// 某个包完成；返回是否是第一次完成（每个包只计数一次）
    pub fn complete(&mut self, name: &str, old: Option<&str>, new: Option<&str>) -> bool {
        let Some(i) = self.track(name) else {
            return false;
        };
        if self.phase < UpdatePhase::Installing {
            self.enter(UpdatePhase::Installing);
        }
        if self.phase != UpdatePhase::Installing {
            return false;
        }
        self.set_versions(name, old, new);
        if !self.packages[i].advance(PackageStatus::Complete) {
            return false;
        }
        self.completed += 1;
        let changed = self.set_current(name);
        let fraction = self.phase_fraction(self.completed, 0.0);
        if !self.advance(fraction) && changed {
            self.emit();
        }
        true
    }

    /// 当前正在安装的包（若有）
    pub fn in_flight(&self) -> Option<&str> {
        let name = self.current.as_deref()?;
        match self.package(name) {
            Some(pkg) if pkg.status == PackageStatus::Installing => Some(name),
            _ => None,
        }
    }

    /// 把正在安装的包标记为完成（下一个包开始时调用）
    pub fn complete_in_flight(&mut self) {
        if let Some(name) = self.in_flight().map(str::to_string) {
            self.complete(&name, None, None);
        }
    }

    /// 当前阶段内的百分比（0-100）
    pub fn percent(&mut self, pct: f64) -> bool {
        let partial = pct / 100.0;
        match self.phase {
            UpdatePhase::Checking => self.advance(partial),
            UpdatePhase::Downloading => {
                let partial = match self.current.as_deref() {
                    Some(name) if self.fetched.contains(name) => 0.0,
                    _ => partial,
                };
                let fraction = self.phase_fraction(self.downloaded, partial);
                self.advance(fraction)
            }
            UpdatePhase::Installing => {
                let partial = if self.in_flight().is_some() { partial } else { 0.0 };
                let fraction = self.phase_fraction(self.completed, partial);
                self.advance(fraction)
            }
            _ => false,
        }
    }

    /// 工具明确表示没有需要更新的内容
    pub fn mark_nothing_to_do(&mut self) {
        self.nothing_to_do = true;
        if self.phase.is_terminal() {
            return;
        }
        self.phase = UpdatePhase::Complete;
        self.progress = 1.0;
        self.speed = None;
        self.eta = None;
        self.message = Some(UP_TO_DATE_MESSAGE.to_string());
        self.emit();
    }

    /// 收尾：成功时把进行中的包提升为完成，失败时标记为错误。
    /// 返回所有非 pending 的包，按首次出现顺序。
    pub fn finalize(&mut self, success: bool) -> Vec<Package> {
        let target = if success {
            PackageStatus::Complete
        } else {
            PackageStatus::Error
        };
        let promote_pending = success && self.promote_expected && !self.nothing_to_do;
        for pkg in &mut self.packages {
            let unfinished = match pkg.status {
                PackageStatus::Downloading | PackageStatus::Installing => true,
                PackageStatus::Pending => promote_pending,
                _ => false,
            };
            if unfinished && pkg.advance(target) && success {
                self.completed += 1;
            }
        }
        self.packages
            .iter()
            .filter(|p| p.status != PackageStatus::Pending)
            .cloned()
            .collect()
    }
}

/// 去掉版本后缀：第一个 `-<数字>` 之前的部分
pub fn strip_version(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    for i in 1..bytes.len().saturating_sub(1) {
        if bytes[i] == b'-' && bytes[i + 1].is_ascii_digit() {
            return &raw[..i];
        }
    }
    raw
}

/// 去掉 Debian 风格的架构后缀：`libssl3:amd64` → `libssl3`
pub fn strip_arch_qualifier(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

// ========== 逐后端规则 ==========

/// 单个后端的逐行匹配规则
pub trait LineRules: Send {
    fn parse_line(&mut self, line: &str, state: &mut ParseState);
}

/// 流式解析器的统一接口，供执行器驱动
pub trait OutputParser: Send {
    /// 喂入一个原始输出块，返回由此产生的进度事件
    fn feed(&mut self, chunk: &[u8]) -> Vec<Progress>;
    /// 输出结束，处理剩余的半行
    fn finish(&mut self) -> Vec<Progress>;
    fn phase(&self) -> UpdatePhase;
    /// 最近的输出行，用于错误提取
    fn lines(&self) -> &VecDeque<String>;
    fn nothing_to_do(&self) -> bool;
    fn finalize(&mut self, success: bool) -> Vec<Package>;
}

pub struct StreamParser<R> {
    buffer: LineBuffer,
    state: ParseState,
    rules: R,
}

impl<R: LineRules> StreamParser<R> {
    pub fn new(rules: R, ranges: PhaseRanges, skip: SkipPatterns) -> Self {
        Self {
            buffer: LineBuffer::new(),
            state: ParseState::new(ranges, skip),
            rules,
        }
    }

    /// 用发现阶段得到的待更新列表预置状态
    pub fn seeded(mut self, pending: &[Package]) -> Self {
        for pkg in pending {
            self.state.expect(pkg.clone());
        }
        self
    }

    /// 工具不逐包报告结果时使用：成功即视为列表中的包全部完成
    pub fn promoting_expected(mut self) -> Self {
        self.state.promote_expected = true;
        self
    }

    pub fn state(&self) -> &ParseState {
        &self.state
    }

    fn handle(&mut self, line: &str) {
        self.state.record_line(line);
        if self.state.phase().is_terminal() {
            return;
        }
        self.rules.parse_line(line, &mut self.state);
    }
}

impl<R: LineRules> OutputParser for StreamParser<R> {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Progress> {
        for line in self.buffer.push(chunk) {
            self.handle(&line);
        }
        self.state.take_events()
    }

    fn finish(&mut self) -> Vec<Progress> {
        if let Some(line) = self.buffer.flush() {
            self.handle(&line);
        }
        self.state.take_events()
    }

    fn phase(&self) -> UpdatePhase {
        self.state.phase()
    }

    fn lines(&self) -> &VecDeque<String> {
        self.state.lines()
    }

    fn nothing_to_do(&self) -> bool {
        self.state.nothing_to_do()
    }

    fn finalize(&mut self, success: bool) -> Vec<Package> {
        self.state.finalize(success)
    }
}

// ========== 进度行分词 ==========

static PERCENT: Pattern = Pattern::new(r"(\d{1,3})\s*%");

/// 行内最后一个 0-100 的百分比
pub fn find_percent(line: &str) -> Option<f64> {
    let re = PERCENT.regex()?;
    re.captures_iter(line)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .filter(|&pct| pct <= 100)
        .last()
        .map(f64::from)
}

/// 从 pacman / dnf 风格的进度行中拆出的字段。
///
/// 典型行：
///   `wget-1.21.4-1-x86_64  750.3 KiB  1.20 MiB/s 00:01 [#####-----] 45%`
///   `(1/5): bash-5.2.26-3.fc40.x86_64.rpm  100% | 2.3 MB/s | 1.8 MB  00:00`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressInfo {
    pub label: String,
    pub size: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub percent: Option<u8>,
}

impl ProgressInfo {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(parse_size)
    }

    pub fn eta_duration(&self) -> Option<Duration> {
        self.eta.as_deref().and_then(parse_eta)
    }
}

pub fn parse_progress_info(raw: &str) -> ProgressInfo {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let n = tokens.len();
    let mut info = ProgressInfo::default();

    let mut i = 0;
    while i < n {
        let t = tokens[i];

        // 进度条 [####]、计数 (1/5): [1/5]、分隔符 |
        if t.starts_with('[') || t.starts_with('(') || t == "|" {
            i += 1;
            continue;
        }
        if let Some(digits) = t.strip_suffix('%') {
            if let Ok(pct) = digits.parse::<u8>() {
                info.percent = Some(pct.min(100));
            }
            i += 1;
            continue;
        }
        if is_time_token(t) {
            if info.eta.is_none() {
                info.eta = Some(t.to_string());
            }
            i += 1;
            continue;
        }
        // "1.23 MiB/s"
        if i + 1 < n && is_number_token(t) && is_speed_unit(tokens[i + 1]) {
            info.speed = Some(format!("{} {}", t, tokens[i + 1]));
            i += 2;
            continue;
        }
        // "1.23MiB/s"
        if is_speed_unit(t) {
            if info.speed.is_none() {
                info.speed = Some(t.to_string());
            }
            i += 1;
            continue;
        }
        // "200.0 KiB"
        if i + 1 < n && is_number_token(t) && is_size_unit(tokens[i + 1]) {
            if info.size.is_none() {
                info.size = Some(format!("{} {}", t, tokens[i + 1]));
            }
            i += 2;
            continue;
        }
        // "200.0KiB"
        if split_size(t).is_some() {
            if info.size.is_none() {
                info.size = Some(t.to_string());
            }
            i += 1;
            continue;
        }
        if info.label.is_empty() && !is_number_token(t) {
            info.label = t.to_string();
        }
        i += 1;
    }

    info
}

fn is_number_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
}

fn is_time_token(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit()) && parse_eta(s).is_some()
}

fn is_speed_unit(s: &str) -> bool {
    s.ends_with("B/s")
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    Some(match unit {
        "B" => 1,
        "kB" | "KB" => 1_000,
        "KiB" => 1 << 10,
        "MB" => 1_000_000,
        "MiB" => 1 << 20,
        "GB" => 1_000_000_000,
        "GiB" => 1 << 30,
        "TB" => 1_000_000_000_000,
        "TiB" => 1 << 40,
        _ => return None,
    })
}

fn is_size_unit(s: &str) -> bool {
    unit_multiplier(s).is_some()
}

fn split_size(token: &str) -> Option<(&str, &str)> {
    let pos = token.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = token.split_at(pos);
    if is_number_token(number) && is_size_unit(unit) {
        Some((number, unit))
    } else {
        None
    }
}

/// 解析 `1,234 kB`、`4.50 MiB`、`200.0KiB` 之类的大小，返回字节数
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let (number, unit) = match text.split_once(char::is_whitespace) {
        Some((number, unit)) => (number, unit.trim()),
        None => split_size(text)?,
    };
    let multiplier = unit_multiplier(unit)?;
    let value: f64 = number.replace(',', "").parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as u64)
}

/// 解析剩余时间：`00:23`、`1:02:03`、`00m01s`、`12.0s`、`1h5m`
pub fn parse_eta(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.contains(':') {
        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() > 3 || parts.iter().skip(1).any(|p| p.len() != 2) {
            return None;
        }
        let mut secs = 0u64;
        for part in parts {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            secs = secs.checked_mul(60)?.checked_add(part.parse::<u64>().ok()?)?;
        }
        return Some(Duration::from_secs(secs));
    }

    let mut total = 0.0f64;
    let mut number = String::new();
    let mut saw_unit = false;
    for c in text.chars() {
        match c {
            '0'..='9' | '.' => number.push(c),
            'h' | 'm' | 's' => {
                let value: f64 = number.parse().ok()?;
                number.clear();
                saw_unit = true;
                total += value
                    * match c {
                        'h' => 3600.0,
                        'm' => 60.0,
                        _ => 1.0,
                    };
            }
            _ => return None,
        }
    }
    if !number.is_empty() || !saw_unit {
        return None;
    }
    // 过大或非有限的值视为无法解析
    Duration::try_from_secs_f64(total).ok()
}
