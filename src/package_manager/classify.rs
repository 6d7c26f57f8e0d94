//! 根据退出码和输出判定一次运行的成败，并提取面向用户的错误信息

use super::types::BackendKind;
use std::collections::VecDeque;

/// 识别错误行的标记
#[derive(Debug, Clone, Copy)]
pub struct ErrorMarkers {
    /// 行首前缀，区分大小写（如 APT 的 `E:`）
    pub prefixes: &'static [&'static str],
    /// 不区分大小写的子串（`error` 总是包含在内）
    pub words: &'static [&'static str],
}

impl ErrorMarkers {
    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Apt => Self {
                prefixes: &["E:"],
                words: &[],
            },
            BackendKind::Dnf => Self {
                prefixes: &[],
                words: &["failed"],
            },
            BackendKind::Pacman => Self {
                prefixes: &["error:"],
                words: &["failed"],
            },
            BackendKind::Flatpak | BackendKind::Snap => Self {
                prefixes: &[],
                words: &[],
            },
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        if self.prefixes.iter().any(|p| line.starts_with(p)) {
            return true;
        }
        let lower = line.to_lowercase();
        lower.contains("error") || self.words.iter().any(|w| lower.contains(w))
    }
}

/// 失败时兜底使用的 "<工具> <操作>"
pub fn operation(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Apt => "apt full-upgrade",
        BackendKind::Dnf => "dnf upgrade",
        BackendKind::Pacman => "pacman upgrade",
        BackendKind::Flatpak => "flatpak update",
        BackendKind::Snap => "snap refresh",
    }
}

/// 从最后一行往前找第一条错误行，只取其第一行
pub fn extract_error(lines: &VecDeque<String>, markers: &ErrorMarkers) -> Option<String> {
    lines
        .iter()
        .rev()
        .find(|line| markers.matches(line))
        .and_then(|line| line.lines().next())
        .map(|line| line.trim().to_string())
}

/// 判定运行结果。
///
/// 退出码为 0，或工具明确表示无事可做，即为成功；否则返回错误信息。
/// `exit_code` 为 `None` 表示进程被信号终止。
pub fn classify(
    kind: BackendKind,
    exit_code: Option<i32>,
    lines: &VecDeque<String>,
    nothing_to_do: bool,
) -> Result<(), String> {
    if exit_code == Some(0) || nothing_to_do {
        return Ok(());
    }
    let markers = ErrorMarkers::for_backend(kind);
    if let Some(message) = extract_error(lines, &markers) {
        return Err(message);
    }
    Err(match exit_code {
        Some(code) => format!("{} failed (exit code {})", operation(kind), code),
        None => format!("{} failed (terminated by signal)", operation(kind)),
    })
}
