use crate::orchestrator::RunSummary;
use crate::package_manager::{BackendKind, UpdateResult};
use std::fmt::Write;

/// 每个后端默认最多列出的包数
fn row_limit(kind: BackendKind) -> usize {
    match kind {
        BackendKind::Flatpak | BackendKind::Snap => 8,
        _ => 12,
    }
}

fn format_duration(result: &UpdateResult) -> String {
    let secs = result.duration().as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// 渲染最终汇总；`verbose` 时不截断包列表
pub fn format_summary(summary: &RunSummary, verbose: bool) -> String {
    let mut out = String::new();

    if summary.results.is_empty() {
        out.push_str("No supported package managers found.\n");
        return out;
    }

    out.push_str("Update summary\n");
    for (kind, result) in &summary.results {
        let elapsed = format_duration(result);
        if result.success {
            let _ = writeln!(
                out,
                "  ✓ {}: {} package(s) in {}",
                kind.display_name(),
                result.package_count(),
                elapsed
            );
        } else {
            let _ = writeln!(
                out,
                "  ✗ {}: {} ({})",
                kind.display_name(),
                result.error_message.as_deref().unwrap_or("update failed"),
                elapsed
            );
        }

        let limit = if verbose { usize::MAX } else { row_limit(*kind) };
        for pkg in result.packages.iter().take(limit) {
            let _ = writeln!(out, "      {}", pkg);
        }
        if result.packages.len() > limit {
            let _ = writeln!(out, "      … and {} more", result.packages.len() - limit);
        }
    }

    let failed = summary.failures().count();
    let _ = write!(
        out,
        "Total: {} package(s) across {} backend(s)",
        summary.total_packages(),
        summary.results.len()
    );
    if failed > 0 {
        let _ = write!(out, ", {} failed", failed);
    }
    out.push('\n');
    out
}
