//! 更新引擎共用的数据类型：阶段、包、进度快照、运行结果

use chrono::{DateTime, Local};
use std::fmt;
use std::time::Duration;

/// 后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Apt,
    Dnf,
    Pacman,
    Flatpak,
    Snap,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Apt,
        BackendKind::Dnf,
        BackendKind::Pacman,
        BackendKind::Flatpak,
        BackendKind::Snap,
    ];

    /// 短标识，用于日志文件名和进度面板的键
    pub fn key(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
            Self::Flatpak => "flatpak",
            Self::Snap => "snap",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Apt => "APT Packages",
            Self::Dnf => "DNF Packages",
            Self::Pacman => "Pacman Packages",
            Self::Flatpak => "Flatpak Apps",
            Self::Snap => "Snap Packages",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Apt => "APT",
            Self::Dnf => "DNF",
            Self::Pacman => "Pacman",
            Self::Flatpak => "Flatpak",
            Self::Snap => "Snap",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 一次更新运行所处的阶段。
///
/// 声明顺序即前进顺序；`Complete` 与 `Error` 为终止阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    Downloading,
    Installing,
    Complete,
    Error,
}

impl UpdatePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// 从 `self` 能否转入 `next`：只能前进，`Error` 可从任意非终止阶段进入
    pub fn can_advance_to(&self, next: UpdatePhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Error || next > *self
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// 单个包的状态，只能沿 pending→downloading→installing→complete 前进，
/// 或从任意非终止状态进入 error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PackageStatus {
    #[default]
    Pending,
    Downloading,
    Installing,
    Complete,
    Error,
}

impl PackageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// 一个正在变更版本的软件单元
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Package {
    pub name: String,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
    /// 字节数
    pub size: Option<u64>,
    pub status: PackageStatus,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_versions(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_version = old;
        self.new_version = new;
        self
    }

    /// 推进状态；返回状态是否确实发生了变化
    pub fn advance(&mut self, next: PackageStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if next == PackageStatus::Error || next > self.status {
            self.status = next;
            return true;
        }
        false
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old_version, &self.new_version) {
            (Some(old), Some(new)) => write!(f, "{}: {} → {}", self.name, old, new),
            _ => f.write_str(&self.name),
        }
    }
}

/// 某一时刻的进度快照，通过回调发出，不做持久化
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Progress {
    pub phase: UpdatePhase,
    /// 0.0 ~ 1.0
    pub progress: f64,
    pub total_packages: usize,
    pub completed_packages: usize,
    pub current_package: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<Duration>,
    pub message: Option<String>,
}

impl Progress {
    pub fn new(phase: UpdatePhase, progress: f64) -> Self {
        Self {
            phase,
            progress: progress.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_counts(mut self, completed: usize, total: usize) -> Self {
        self.completed_packages = completed;
        self.total_packages = total;
        self
    }

    pub fn percent(&self) -> u8 {
        (self.progress * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// 一个后端一次运行的最终结果，创建后不再修改
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub success: bool,
    pub packages: Vec<Package>,
    /// 仅在 `success == false` 时存在
    pub error_message: Option<String>,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
}

impl UpdateResult {
    pub fn succeeded(packages: Vec<Package>, start_time: DateTime<Local>) -> Self {
        Self {
            success: true,
            packages,
            error_message: None,
            start_time,
            end_time: Local::now(),
        }
    }

    pub fn failed(
        message: impl Into<String>,
        packages: Vec<Package>,
        start_time: DateTime<Local>,
    ) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "update failed".to_string();
        }
        Self {
            success: false,
            packages,
            error_message: Some(message),
            start_time,
            end_time: Local::now(),
        }
    }

    pub fn cancelled(reason: super::cancel::CancelReason, start_time: DateTime<Local>) -> Self {
        Self::failed(reason.message(), Vec::new(), start_time)
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
