//! 更新引擎：各包管理器后端的统一抽象
//!
//! 每个后端实现 [`UpdateBackend`]：可用性检测、更新发现、执行更新。
//! 进度通过 [`ProgressSink`] 发出，结果以 [`UpdateResult`] 返回，
//! 执行过程中的任何错误都不会以 `Err` 或 panic 的形式逃出 `run_update`。

pub mod availability;
pub mod backends;
pub mod cancel;
pub mod classify;
pub mod parser;
pub mod progress;
pub mod streaming;
pub mod types;

pub use availability::AvailabilityCache;
pub use cancel::{cancel_pair, CancelReason, CancelSignal};
pub use progress::{scaled_sink, ProgressRange, ProgressSink};
pub use types::{BackendKind, Package, Progress, UpdatePhase, UpdateResult};

use async_trait::async_trait;
use parser::SkipPatterns;
use std::path::PathBuf;
use std::sync::Arc;

#[async_trait]
pub trait UpdateBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().display_name()
    }

    /// 工具是否存在；任何探测错误都返回 `false`
    async fn check_available(&self) -> bool;

    /// 列出待更新的包（不修改系统），失败时返回空列表
    async fn check_updates(&self) -> Vec<Package>;

    /// 执行更新；`dry_run` 时只做发现
    async fn run_update(
        &self,
        sink: ProgressSink,
        dry_run: bool,
        cancel: CancelSignal,
    ) -> UpdateResult;
}

/// 所有后端共享的运行环境
#[derive(Debug, Clone)]
pub struct BackendEnv {
    pub availability: Arc<AvailabilityCache>,
    /// `None` 表示不写日志文件
    pub log_dir: Option<PathBuf>,
    pub flatpak_skip: SkipPatterns,
    pub snap_skip: SkipPatterns,
}

impl BackendEnv {
    pub fn new(availability: Arc<AvailabilityCache>, log_dir: Option<PathBuf>) -> Self {
        Self {
            availability,
            log_dir,
            flatpak_skip: SkipPatterns::new(parser::flatpak::DEFAULT_SKIP),
            snap_skip: SkipPatterns::new(parser::snap::DEFAULT_SKIP),
        }
    }

    pub fn with_skip(mut self, flatpak: SkipPatterns, snap: SkipPatterns) -> Self {
        self.flatpak_skip = flatpak;
        self.snap_skip = snap;
        self
    }
}

/// 为某个后端种类构造默认实现
pub fn backend_for(kind: BackendKind, env: BackendEnv) -> Box<dyn UpdateBackend> {
    match kind {
        BackendKind::Apt => Box::new(backends::apt::AptBackend::new(env)),
        BackendKind::Dnf => Box::new(backends::dnf::DnfBackend::new(env)),
        BackendKind::Pacman => Box::new(backends::pacman::PacmanBackend::new(env)),
        BackendKind::Flatpak => Box::new(backends::flatpak::FlatpakBackend::new(env)),
        BackendKind::Snap => Box::new(backends::snap::SnapBackend::new(env)),
    }
}
