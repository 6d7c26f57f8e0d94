//! 单次运行的原始输出日志
//!
//! 文件名：`<log_dir>/sysupdate_<YYYYmmdd_HHMMSS>_<后端>.log`。
//! 打开失败只记录警告，运行照常进行。

use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct RunLog {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl RunLog {
    /// 不写文件的日志（`--no-log` 或测试）
    pub fn disabled() -> Self {
        Self::default()
    }

    /// `log_dir` 为 `None` 时等同于 [`RunLog::disabled`]
    pub fn open(log_dir: Option<&Path>, key: &str) -> Self {
        let Some(dir) = log_dir else {
            return Self::disabled();
        };
        let filename = format!("sysupdate_{}_{}.log", Local::now().format("%Y%m%d_%H%M%S"), key);
        let path = dir.join(filename);

        let opened = fs::create_dir_all(dir).and_then(|_| File::create(&path));
        match opened {
            Ok(file) => {
                log::debug!("{} 日志文件: {}", key, path.display());
                Self {
                    path: Some(path),
                    writer: Some(BufWriter::new(file)),
                }
            }
            Err(e) => {
                log::warn!("无法创建日志文件 {}: {}", path.display(), e);
                Self::disabled()
            }
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[cfg(test)]
    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// 原样写入一个输出块（保留 `\r`，方便事后对照进度行）
    pub fn write_chunk(&mut self, bytes: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(bytes) {
            self.fail(e);
        }
    }

    /// 写入一行说明，例如执行的命令和退出码
    pub fn note(&mut self, line: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writeln!(writer, "[{}] {}", Local::now().format("%H:%M:%S"), line) {
            self.fail(e);
        }
    }

    // 写入出错后不再尝试，避免每个块都刷一条警告
    fn fail(&mut self, e: std::io::Error) {
        if let Some(path) = &self.path {
            log::warn!("写入日志文件 {} 失败: {}", path.display(), e);
        }
        self.writer = None;
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}
