//! 下载引擎
//!
//! 以独立子进程运行外部下载器：`<binary> [extra_args...] -o <destination> <url>`。
//! URL 作为单独参数传入，不经过 shell 解释。

use async_trait::async_trait;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 诊断信息保留的最大字节数（保留末尾）
const MAX_DIAGNOSTIC_BYTES: usize = 4096;

/// 进程退出后等待输出管道关闭的时间
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 一次下载的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// 退出码为 0
    Success(PathBuf),
    /// 退出码非 0 或进程无法启动，附带诊断信息
    Failure(String),
    /// 超时，进程已被终止
    TimedOut(Duration),
    /// 被取消，进程已被终止
    Cancelled,
}

/// 下载器抽象
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn run(
        &self,
        url: &str,
        destination: &Path,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> DownloadOutcome;
}

/// 调用 lux（或兼容命令行的下载器）的实现
#[derive(Debug, Clone)]
pub struct LuxDownloader {
    binary: PathBuf,
    extra_args: Vec<String>,
    /// 诊断信息里出现的下载目录前缀会被去掉
    download_dir: PathBuf,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl LuxDownloader {
    pub fn new(binary: PathBuf, extra_args: Vec<String>, download_dir: PathBuf) -> Self {
        Self {
            binary,
            extra_args,
            download_dir,
        }
    }

    fn build_command(&self, url: &str, destination: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.extra_args)
            .arg("-o")
            .arg(destination)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // 独立进程组，终止时连同下载器派生的子进程一起结束
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// 整理诊断信息：去掉下载目录前缀，只保留末尾一段
    fn clean_diagnostic(&self, text: &str) -> String {
        let dir = self.download_dir.display().to_string();
        let mut cleaned = text.trim().to_string();
        if !dir.is_empty() {
            cleaned = cleaned
                .replace(&format!("{}{}", dir, MAIN_SEPARATOR), "")
                .replace(&dir, ".");
        }
        truncate_tail(&cleaned, MAX_DIAGNOSTIC_BYTES)
    }

    fn failure_reason(&self, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> String {
        let stderr_text = String::from_utf8_lossy(stderr);
        if !stderr_text.trim().is_empty() {
            return self.clean_diagnostic(&stderr_text);
        }

        let stdout_text = String::from_utf8_lossy(stdout);
        if !stdout_text.trim().is_empty() {
            return self.clean_diagnostic(&stdout_text);
        }

        match status.code() {
            Some(code) => format!("下载器退出码 {}", code),
            None => "下载器被信号终止".to_string(),
        }
    }
}

#[async_trait]
impl Downloader for LuxDownloader {
    async fn run(
        &self,
        url: &str,
        destination: &Path,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> DownloadOutcome {
        if cancel.is_cancelled() {
            return DownloadOutcome::Cancelled;
        }

        if let Some(parent) = destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return DownloadOutcome::Failure(format!("无法创建目标目录: {}", e.kind()));
            }
        }

        let mut child = match self.build_command(url, destination).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("启动下载器失败: binary={:?}, 错误: {}", self.binary, e);
                return DownloadOutcome::Failure(format!("无法启动下载器: {}", e));
            }
        };
        debug!("下载器已启动: pid={:?}, url={}", child.id(), url);

        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Waited::Cancelled,
            result = tokio::time::timeout(timeout, child.wait()) => match result {
                Ok(status) => Waited::Exited(status),
                Err(_) => Waited::TimedOut,
            },
        };

        match waited {
            Waited::Cancelled => {
                terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                DownloadOutcome::Cancelled
            }
            Waited::TimedOut => {
                terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                DownloadOutcome::TimedOut(timeout)
            }
            Waited::Exited(Err(e)) => {
                terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                DownloadOutcome::Failure(format!("等待下载器退出失败: {}", e))
            }
            Waited::Exited(Ok(status)) => {
                let stdout = collect_output(stdout_task).await;
                let stderr = collect_output(stderr_task).await;

                if status.success() {
                    DownloadOutcome::Success(destination.to_path_buf())
                } else {
                    DownloadOutcome::Failure(self.failure_reason(status, &stdout, &stderr))
                }
            }
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// 下载器派生的子进程可能继续持有管道，读取设置上限
async fn collect_output(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}

/// 终止下载器及其进程组
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!("终止下载器进程组失败: pgid={}, 错误: {}", pid, e),
        }
    }

    if let Err(e) = child.kill().await {
        // 进程可能已经退出
        debug!("终止下载器进程失败: {}", e);
    }
}

fn truncate_tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
