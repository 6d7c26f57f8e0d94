//! 并发驱动多个后端并汇总结果
//!
//! 所有后端的 `run_update` 在同一个任务里用 `join_all` 并发推进，
//! 单个后端失败或 panic 不会影响其他后端。

use crate::package_manager::{
    scaled_sink, BackendKind, CancelSignal, Progress, ProgressRange, ProgressSink, UpdateBackend,
    UpdatePhase, UpdateResult,
};
use chrono::Local;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 显示层实现的观察者，每次进度更新时调用
pub trait BoardObserver: Send + Sync {
    /// `progress` 已缩放到该后端的显示区间，`overall` 为全部后端的合计进度
    fn on_update(&self, kind: BackendKind, progress: &Progress, overall: f64);
}

/// 不显示任何内容的观察者
#[cfg(test)]
pub struct SilentObserver;

#[cfg(test)]
impl BoardObserver for SilentObserver {
    fn on_update(&self, _kind: BackendKind, _progress: &Progress, _overall: f64) {}
}

struct BoardEntry {
    kind: BackendKind,
    range: ProgressRange,
    latest: Option<Progress>,
}

/// 每个后端最新的（已缩放）进度快照
pub struct ProgressBoard {
    entries: Mutex<Vec<BoardEntry>>,
    observer: Arc<dyn BoardObserver>,
}

impl ProgressBoard {
    pub fn new(layout: &[(BackendKind, ProgressRange)], observer: Arc<dyn BoardObserver>) -> Self {
        let entries = layout
            .iter()
            .map(|&(kind, range)| BoardEntry {
                kind,
                range,
                latest: None,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            observer,
        }
    }

    /// 记录一个已缩放的快照并通知观察者
    pub fn record(&self, kind: BackendKind, progress: Progress) {
        let overall = {
            let Ok(mut entries) = self.entries.lock() else {
                return;
            };
            let Some(entry) = entries.iter_mut().find(|e| e.kind == kind) else {
                log::debug!("未登记的后端 {}，忽略进度", kind);
                return;
            };
            entry.latest = Some(progress.clone());
            Self::sum(&entries)
        };
        // 观察者在锁外调用
        self.observer.on_update(kind, &progress, overall);
    }

    /// 合计进度：各后端 `(p - start)` 之和
    #[allow(dead_code)]
    pub fn overall(&self) -> f64 {
        self.entries.lock().map(|e| Self::sum(&e)).unwrap_or(0.0)
    }

    /// 某个后端在自身 `[0,1]` 坐标下的最新快照
    pub fn local(&self, kind: BackendKind) -> Option<Progress> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.iter().find(|e| e.kind == kind)?;
        let mut progress = entry.latest.clone()?;
        progress.progress = entry.range.unscale(progress.progress);
        Some(progress)
    }

    fn sum(entries: &[BoardEntry]) -> f64 {
        let total: f64 = entries
            .iter()
            .filter_map(|e| e.latest.as_ref().map(|p| p.progress - e.range.start))
            .sum();
        total.clamp(0.0, 1.0)
    }

    /// 指向某个后端条目的回调
    pub fn sink(self: &Arc<Self>, kind: BackendKind) -> ProgressSink {
        let board = Arc::clone(self);
        Arc::new(move |progress| board.record(kind, progress))
    }
}

/// 一次运行的汇总，按调用顺序
#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<(BackendKind, UpdateResult)>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, r)| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &(BackendKind, UpdateResult)> {
        self.results.iter().filter(|(_, r)| !r.success)
    }

    pub fn total_packages(&self) -> usize {
        self.results.iter().map(|(_, r)| r.package_count()).sum()
    }
}

pub struct Orchestrator {
    backends: Vec<Box<dyn UpdateBackend>>,
    grace: Duration,
}

impl Orchestrator {
    pub fn new(backends: Vec<Box<dyn UpdateBackend>>, grace: Duration) -> Self {
        Self { backends, grace }
    }

    /// 并发探测所有候选后端，保留可用的（保持原顺序）
    pub async fn available(candidates: Vec<Box<dyn UpdateBackend>>) -> Vec<Box<dyn UpdateBackend>> {
        let checks = join_all(candidates.iter().map(|b| b.check_available())).await;
        candidates
            .into_iter()
            .zip(checks)
            .filter_map(|(backend, available)| {
                if !available {
                    log::info!("{} 不可用，跳过", backend.name());
                }
                available.then_some(backend)
            })
            .collect()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// 第 i 个（共 n 个）后端的显示区间 `[i/n, (i+1)/n]`
    pub fn layout(&self) -> Vec<(BackendKind, ProgressRange)> {
        let n = self.backends.len().max(1) as f64;
        self.backends
            .iter()
            .enumerate()
            .map(|(i, b)| (b.kind(), ProgressRange::new(i as f64 / n, (i + 1) as f64 / n)))
            .collect()
    }

    pub async fn run(
        &self,
        observer: Arc<dyn BoardObserver>,
        dry_run: bool,
        cancel: CancelSignal,
    ) -> RunSummary {
        let layout = self.layout();
        let board = Arc::new(ProgressBoard::new(&layout, observer));

        let runs = self.backends.iter().zip(&layout).map(|(backend, &(kind, range))| {
            let sink = scaled_sink(board.sink(kind), range);
            let board = Arc::clone(&board);
            let cancel = cancel.clone();
            async move {
                let result =
                    guarded(backend.as_ref(), sink.clone(), dry_run, cancel, self.grace).await;
                if !result.success && board.local(kind).is_some_and(|p| !p.phase.is_terminal()) {
                    // 被放弃或 panic 的后端没有机会自己报告 ERROR
                    let progress = board.local(kind).map(|p| p.progress).unwrap_or(0.0);
                    let mut event = Progress::new(UpdatePhase::Error, progress);
                    event.message = result.error_message.clone();
                    sink(event);
                }
                (kind, result)
            }
        });

        RunSummary {
            results: join_all(runs).await,
        }
    }
}

/// 运行一个后端：隔离 panic，取消后超过宽限期仍未结束则放弃
async fn guarded(
    backend: &dyn UpdateBackend,
    sink: ProgressSink,
    dry_run: bool,
    cancel: CancelSignal,
    grace: Duration,
) -> UpdateResult {
    let start = Local::now();
    let mut watcher = cancel.clone();
    let run = AssertUnwindSafe(backend.run_update(sink, dry_run, cancel)).catch_unwind();
    tokio::pin!(run);

    let expired = async {
        let reason = watcher.cancelled().await;
        tokio::time::sleep(grace).await;
        reason
    };

    tokio::select! {
        outcome = &mut run => match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = format!("{} backend panicked: {}", backend.name(), panic_message(payload.as_ref()));
                log::error!("{}", message);
                UpdateResult::failed(message, Vec::new(), start)
            }
        },
        reason = expired => {
            log::warn!("{} 在宽限期 {:?} 内未结束，强制放弃", backend.name(), grace);
            UpdateResult::cancelled(reason, start)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::{cancel_pair, CancelReason, Package};
    use async_trait::async_trait;

    enum Behaviour {
        Succeed(usize),
        Fail(&'static str),
        Panic,
        Hang,
    }

    struct FakeBackend {
        kind: BackendKind,
        available: bool,
        behaviour: Behaviour,
    }

    impl FakeBackend {
        fn boxed(kind: BackendKind, behaviour: Behaviour) -> Box<dyn UpdateBackend> {
            Box::new(Self {
                kind,
                available: true,
                behaviour,
            })
        }
    }

    #[async_trait]
    impl UpdateBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn check_available(&self) -> bool {
            self.available
        }

        async fn check_updates(&self) -> Vec<Package> {
            Vec::new()
        }

        async fn run_update(
            &self,
            sink: ProgressSink,
            _dry_run: bool,
            _cancel: CancelSignal,
        ) -> UpdateResult {
            let start = Local::now();
            sink(Progress::new(UpdatePhase::Checking, 0.0));
            tokio::task::yield_now().await;
            match self.behaviour {
                Behaviour::Succeed(n) => {
                    sink(Progress::new(UpdatePhase::Installing, 0.5));
                    tokio::task::yield_now().await;
                    sink(Progress::new(UpdatePhase::Complete, 1.0).with_counts(n, n));
                    let packages = (0..n).map(|i| Package::new(format!("pkg{i}"))).collect();
                    UpdateResult::succeeded(packages, start)
                }
                Behaviour::Fail(message) => {
                    sink(Progress::new(UpdatePhase::Error, 0.2).with_message(message));
                    UpdateResult::failed(message, Vec::new(), start)
                }
                Behaviour::Panic => panic!("parser exploded"),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(BackendKind, Progress, f64)>>,
    }

    impl BoardObserver for Recorder {
        fn on_update(&self, kind: BackendKind, progress: &Progress, overall: f64) {
            self.events.lock().unwrap().push((kind, progress.clone(), overall));
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_all_results() {
        let orchestrator = Orchestrator::new(
            vec![
                FakeBackend::boxed(BackendKind::Apt, Behaviour::Succeed(2)),
                FakeBackend::boxed(BackendKind::Flatpak, Behaviour::Panic),
                FakeBackend::boxed(BackendKind::Snap, Behaviour::Fail("snap refresh failed")),
            ],
            Duration::from_secs(1),
        );
        let summary = orchestrator
            .run(Arc::new(SilentObserver), false, CancelSignal::never())
            .await;

        let kinds: Vec<_> = summary.results.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![BackendKind::Apt, BackendKind::Flatpak, BackendKind::Snap]);
        assert!(summary.results[0].1.success);
        assert_eq!(summary.results[0].1.package_count(), 2);

        let panicked = &summary.results[1].1;
        assert!(!panicked.success);
        assert!(panicked
            .error_message
            .as_deref()
            .unwrap()
            .contains("parser exploded"));

        assert_eq!(
            summary.results[2].1.error_message.as_deref(),
            Some("snap refresh failed")
        );
        assert!(!summary.all_succeeded());
        assert_eq!(summary.failures().count(), 2);
        assert_eq!(summary.total_packages(), 2);
    }

    #[tokio::test]
    async fn test_progress_is_scaled_into_ranges() {
        let orchestrator = Orchestrator::new(
            vec![
                FakeBackend::boxed(BackendKind::Apt, Behaviour::Succeed(1)),
                FakeBackend::boxed(BackendKind::Snap, Behaviour::Succeed(1)),
            ],
            Duration::from_secs(1),
        );
        let recorder = Arc::new(Recorder::default());
        let summary = orchestrator.run(recorder.clone(), false, CancelSignal::never()).await;
        assert!(summary.all_succeeded());

        let events = recorder.events.lock().unwrap();
        let snap_half = events
            .iter()
            .find(|(k, p, _)| *k == BackendKind::Snap && p.phase == UpdatePhase::Installing)
            .unwrap();
        assert_eq!(snap_half.1.progress, 0.75);
        assert!(events.iter().all(|(_, _, overall)| (0.0..=1.0).contains(overall)));
        assert_eq!(events.last().unwrap().2, 1.0);
    }

    #[tokio::test]
    async fn test_hung_backend_is_abandoned_after_grace() {
        let (handle, signal) = cancel_pair();
        let orchestrator = Orchestrator::new(
            vec![
                FakeBackend::boxed(BackendKind::Apt, Behaviour::Succeed(1)),
                FakeBackend::boxed(BackendKind::Dnf, Behaviour::Hang),
            ],
            Duration::from_millis(50),
        );
        let recorder = Arc::new(Recorder::default());
        let run = orchestrator.run(recorder.clone(), false, signal);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel(CancelReason::Interrupted);
        };
        let (summary, ()) = tokio::join!(run, cancel);

        assert!(summary.results[0].1.success);
        let hung = &summary.results[1].1;
        assert!(!hung.success);
        assert_eq!(hung.error_message.as_deref(), Some("Update cancelled by user"));

        let events = recorder.events.lock().unwrap();
        let last_dnf = events
            .iter()
            .rev()
            .find(|(k, _, _)| *k == BackendKind::Dnf)
            .unwrap();
        assert_eq!(last_dnf.1.phase, UpdatePhase::Error);
    }

    #[tokio::test]
    async fn test_available_keeps_order() {
        let candidates: Vec<Box<dyn UpdateBackend>> = vec![
            FakeBackend::boxed(BackendKind::Apt, Behaviour::Succeed(0)),
            Box::new(FakeBackend {
                kind: BackendKind::Dnf,
                available: false,
                behaviour: Behaviour::Succeed(0),
            }),
            FakeBackend::boxed(BackendKind::Snap, Behaviour::Succeed(0)),
        ];
        let kinds: Vec<_> = Orchestrator::available(candidates)
            .await
            .iter()
            .map(|b| b.kind())
            .collect();
        assert_eq!(kinds, vec![BackendKind::Apt, BackendKind::Snap]);
    }

    #[test]
    fn test_board_local_unscales() {
        let layout = [
            (BackendKind::Apt, ProgressRange::new(0.0, 0.5)),
            (BackendKind::Dnf, ProgressRange::new(0.5, 1.0)),
        ];
        let board = ProgressBoard::new(&layout, Arc::new(SilentObserver));
        board.record(BackendKind::Dnf, Progress::new(UpdatePhase::Downloading, 0.75));
        assert_eq!(board.local(BackendKind::Dnf).unwrap().progress, 0.5);
        assert_eq!(board.overall(), 0.25);
        assert!(board.local(BackendKind::Apt).is_none());
    }
}
