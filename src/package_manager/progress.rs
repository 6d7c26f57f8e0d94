//! 进度回调、区间缩放与上报守卫

use super::types::{Progress, UpdatePhase};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// 进度回调。调用方必须保证它不会影响后端执行（见 [`ProgressReporter`]）
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// `[start, end]` 子区间，用于把局部 `[0,1]` 进度映射到全局
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    /// `start > end` 时两端交换；两端都截断到 `[0,1]`
    pub fn new(start: f64, end: f64) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            start: start.clamp(0.0, 1.0),
            end: end.clamp(0.0, 1.0),
        }
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    /// `start + p * (end - start)`，两端点精确命中
    pub fn scale(&self, p: f64) -> f64 {
        if p <= 0.0 || p.is_nan() {
            return self.start;
        }
        if p >= 1.0 {
            return self.end;
        }
        self.start + p * self.width()
    }

    /// `scale` 的逆运算；零宽区间返回 1.0
    pub fn unscale(&self, value: f64) -> f64 {
        if self.width() <= f64::EPSILON {
            return 1.0;
        }
        ((value - self.start) / self.width()).clamp(0.0, 1.0)
    }

    pub fn rescale(&self, mut progress: Progress) -> Progress {
        progress.progress = self.scale(progress.progress);
        progress
    }
}

/// 包装一个回调，把收到的进度值缩放到 `range` 内再转发
pub fn scaled_sink(sink: ProgressSink, range: ProgressRange) -> ProgressSink {
    Arc::new(move |progress| sink(range.rescale(progress)))
}

/// 后端内部使用的上报守卫：
/// - 终止阶段之后的事件全部丢弃
/// - 阶段倒退的事件丢弃（`Error` 除外）
/// - 同一阶段内进度不回退
/// - 回调 panic 被隔离并记录，不影响后端
pub struct ProgressReporter {
    sink: ProgressSink,
    phase: UpdatePhase,
    progress: f64,
    label: &'static str,
}

impl ProgressReporter {
    pub fn new(sink: ProgressSink, label: &'static str) -> Self {
        Self {
            sink,
            phase: UpdatePhase::Idle,
            progress: 0.0,
            label,
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// 转发一个事件；返回是否真正送达
    pub fn report(&mut self, mut progress: Progress) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        if progress.phase == self.phase {
            if progress.progress < self.progress {
                progress.progress = self.progress;
            }
        } else if !self.phase.can_advance_to(progress.phase) {
            log::debug!(
                "{}: 丢弃倒退的进度事件 {:?} -> {:?}",
                self.label,
                self.phase,
                progress.phase
            );
            return false;
        }

        self.phase = progress.phase;
        self.progress = progress.progress;

        let sink = &self.sink;
        if catch_unwind(AssertUnwindSafe(|| sink(progress))).is_err() {
            log::error!("{}: 进度回调发生 panic，已忽略", self.label);
        }
        true
    }
}
