//! 终端进度显示：每个后端一个进度条，外加一个合计进度条

use crate::orchestrator::BoardObserver;
use crate::package_manager::{BackendKind, Progress, ProgressRange, UpdatePhase};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

const BAR_TEMPLATE: &str = "{prefix:>10.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}";
const OVERALL_TEMPLATE: &str = "{prefix:>10.bold.green} [{bar:30.green/white}] {pos:>3}% {elapsed_precise}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

struct Lane {
    bar: ProgressBar,
    range: ProgressRange,
}

pub struct ProgressDisplay {
    // 持有 MultiProgress 才能让各进度条保持在同一绘制区域
    _multi: MultiProgress,
    lanes: HashMap<BackendKind, Lane>,
    overall: Option<ProgressBar>,
}

impl ProgressDisplay {
    pub fn new(layout: &[(BackendKind, ProgressRange)]) -> Self {
        let multi = MultiProgress::new();
        let lanes = layout
            .iter()
            .map(|&(kind, range)| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style(BAR_TEMPLATE));
                bar.set_prefix(kind.label());
                bar.set_message("waiting");
                bar.enable_steady_tick(Duration::from_millis(200));
                (kind, Lane { bar, range })
            })
            .collect();

        // 只有一个后端时合计条是多余的
        let overall = (layout.len() > 1).then(|| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style(OVERALL_TEMPLATE));
            bar.set_prefix("Overall");
            bar
        });

        Self {
            _multi: multi,
            lanes,
            overall,
        }
    }

    /// 结束所有进度条，避免与随后的汇总输出交错
    pub fn finish(&self) {
        for lane in self.lanes.values() {
            if !lane.bar.is_finished() {
                lane.bar.abandon();
            }
        }
        if let Some(bar) = &self.overall {
            bar.finish();
        }
    }
}

impl BoardObserver for ProgressDisplay {
    fn on_update(&self, kind: BackendKind, progress: &Progress, overall: f64) {
        if let Some(lane) = self.lanes.get(&kind) {
            let local = lane.range.unscale(progress.progress);
            lane.bar.set_position(percent(local));
            lane.bar.set_message(status_line(progress));
            match progress.phase {
                UpdatePhase::Complete => lane.bar.finish(),
                UpdatePhase::Error => lane.bar.abandon(),
                _ => {}
            }
        }
        if let Some(bar) = &self.overall {
            bar.set_position(percent(overall));
        }
    }
}

fn percent(fraction: f64) -> u64 {
    (fraction * 100.0).round().clamp(0.0, 100.0) as u64
}

/// 进度条右侧的文字：阶段、当前包、计数、速度
pub fn status_line(progress: &Progress) -> String {
    let mut parts = vec![progress.phase.label().to_string()];
    if progress.total_packages > 0 {
        parts.push(format!(
            "{}/{}",
            progress.completed_packages, progress.total_packages
        ));
    }
    if let Some(name) = &progress.current_package {
        parts.push(name.clone());
    }
    if let Some(speed) = &progress.speed {
        parts.push(speed.clone());
    }
    if let Some(eta) = progress.eta {
        parts.push(format!("ETA {}s", eta.as_secs()));
    }
    // 终止阶段或没有包名时显示消息
    if progress.phase.is_terminal() || progress.current_package.is_none() {
        if let Some(message) = &progress.message {
            parts.push(message.clone());
        }
    }
    parts.join("  ")
}
