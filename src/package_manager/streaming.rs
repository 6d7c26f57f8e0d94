//! 子进程流式执行
//!
//! stdout 与 stderr 合并为一条流，按块读取后交给解析器；
//! 取消时对整个进程组执行信号阶梯：SIGINT → (5s) SIGTERM → (1s) SIGKILL。

use super::cancel::{CancelReason, CancelSignal};
use super::parser::{OutputParser, MAX_LINE_BYTES};
use super::types::Progress;
use crate::logging::RunLog;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

const READ_CHUNK: usize = 1024;
const SIGTERM_AFTER: Duration = Duration::from_secs(5);
const SIGKILL_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read command output: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to create subprocess stdout pipe")]
    MissingStdout,
    #[error("Failed to update package lists")]
    RefreshFailed,
}

/// 输出的读取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// 按 `\n` 读取（APT）
    Lines,
    /// 固定大小的块，用于用 `\r` 原地刷新进度的工具
    #[default]
    Chunks,
}

/// 一条要执行的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub read_mode: ReadMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            read_mode: ReadMode::default(),
        }
    }

    /// `sudo <program> ...`
    pub fn sudo(program: impl Into<String>) -> Self {
        Self::new("sudo").arg(program)
    }

    /// `sh -c <script>`，测试中用来代替真实的包管理器
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = mode;
        self
    }

    /// 用于日志的命令行
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> BackendError {
        BackendError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

/// 一次流式执行的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 进程自行退出；`None` 表示被信号终止
    Exited(Option<i32>),
    Cancelled(CancelReason),
}

/// 执行命令并把输出逐块交给解析器，每个解析出的进度事件交给 `on_event`。
///
/// 子进程有独立的进程组，父进程退出时收到 SIGTERM；
/// 任何提前返回都会因 `kill_on_drop` 结束子进程。
pub async fn stream(
    spec: &CommandSpec,
    parser: &mut dyn OutputParser,
    on_event: &mut (dyn FnMut(Progress) + Send),
    log: &mut RunLog,
    cancel: &mut CancelSignal,
) -> Result<RunOutcome, BackendError> {
    if let Some(reason) = cancel.reason() {
        return Ok(RunOutcome::Cancelled(reason));
    }

    let mut cmd = spec.command();
    cmd.stdout(Stdio::piped()).stderr(Stdio::null());
    unsafe {
        cmd.pre_exec(|| {
            // 独立进程组，方便统一结束 sudo 及其子进程
            libc::setpgid(0, 0);
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            // stderr 并入 stdout
            if libc::dup2(1, 2) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    log.note(&format!("$ {}", spec.display()));
    let mut child = cmd.spawn().map_err(|e| spec.spawn_error(e))?;
    log::debug!("启动 {} (pid {:?})", spec.display(), child.id());
    let stdout = child.stdout.take().ok_or(BackendError::MissingStdout)?;

    let mut reader = OutputReader::new(stdout, spec.read_mode);
    loop {
        tokio::select! {
            reason = cancel.cancelled() => {
                log.note(&format!("cancelled: {}", reason.message()));
                terminate(&mut child).await;
                return Ok(RunOutcome::Cancelled(reason));
            }
            chunk = reader.next_chunk() => {
                let Some(chunk) = chunk? else {
                    break;
                };
                log.write_chunk(chunk);
                for event in parser.feed(chunk) {
                    on_event(event);
                }
            }
        }
    }
    for event in parser.finish() {
        on_event(event);
    }

    let status = tokio::select! {
        reason = cancel.cancelled() => {
            terminate(&mut child).await;
            return Ok(RunOutcome::Cancelled(reason));
        }
        status = child.wait() => status?,
    };
    log.note(&format!("exit status: {}", status));
    Ok(RunOutcome::Exited(status.code()))
}

struct OutputReader<R> {
    inner: BufReader<R>,
    mode: ReadMode,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputReader<R> {
    fn new(inner: R, mode: ReadMode) -> Self {
        Self {
            inner: BufReader::new(inner),
            mode,
            buf: vec![0; READ_CHUNK],
        }
    }

    /// 下一块输出；流结束时返回 `None`
    async fn next_chunk(&mut self) -> std::io::Result<Option<&[u8]>> {
        let n = match self.mode {
            ReadMode::Chunks => {
                self.buf.resize(READ_CHUNK, 0);
                self.inner.read(&mut self.buf).await?
            }
            ReadMode::Lines => {
                self.buf.clear();
                // 没有换行的输出按上限切开
                let mut limited = (&mut self.inner).take(MAX_LINE_BYTES as u64);
                limited.read_until(b'\n', &mut self.buf).await?
            }
        };
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(&self.buf[..n]))
        }
    }
}

fn signal_group(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

async fn exited_within(child: &mut Child, limit: Duration) -> bool {
    matches!(tokio::time::timeout(limit, child.wait()).await, Ok(Ok(_)))
}

/// 信号阶梯，最后回收子进程
async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    signal_group(pid, libc::SIGINT);
    if exited_within(child, SIGTERM_AFTER).await {
        return;
    }
    log::warn!("进程 {} 未响应 SIGINT，发送 SIGTERM", pid);
    signal_group(pid, libc::SIGTERM);
    if exited_within(child, SIGKILL_AFTER).await {
        return;
    }
    log::warn!("进程 {} 未响应 SIGTERM，发送 SIGKILL", pid);
    signal_group(pid, libc::SIGKILL);
    if let Err(e) = child.kill().await {
        log::error!("回收进程 {} 失败: {}", pid, e);
    }
}

/// 一次性执行命令并收集 stdout（用于发现阶段）
#[derive(Debug, Clone)]
pub struct Captured {
    pub code: Option<i32>,
    pub stdout: String,
}

impl Captured {
    pub fn exited_with(&self, accepted: &[i32]) -> bool {
        self.code.is_some_and(|code| accepted.contains(&code))
    }
}

pub async fn capture(spec: &CommandSpec) -> Result<Captured, BackendError> {
    let output = spec
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| spec.spawn_error(e))?;
    Ok(Captured {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}
