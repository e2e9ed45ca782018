use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::downloader::destination::resolve_destination;
use crate::downloader::engine::{DownloadOutcome, Downloader, LuxDownloader};
use crate::downloader::error::{JobError, JobResult};
use crate::downloader::pool::{Admission, ExecutionPool};
use crate::downloader::store::JobStore;
use crate::downloader::task::{DownloadJob, JobStatus};

/// 宽限期结束后，等待被取消的下载进程退出的时间
const FORCED_CANCEL_WAIT: Duration = Duration::from_secs(5);

/// 任务管理器参数
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// 下载目录（已规范化的绝对路径）
    pub download_dir: PathBuf,
    /// 最大同时运行的任务数
    pub max_concurrent_jobs: usize,
    /// 单个任务的超时时间
    pub job_timeout: Duration,
    /// 最多跟踪的任务数
    pub max_tracked_jobs: usize,
}

/// `/status` 使用的汇总信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    pub active_jobs: usize,
    pub queued_jobs: usize,
}

/// worker 需要的共享状态
#[derive(Clone)]
struct WorkerContext {
    store: Arc<JobStore>,
    pool: Arc<ExecutionPool>,
    downloader: Arc<dyn Downloader>,
    /// 运行中任务的取消令牌（job_id -> CancellationToken）
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
    job_timeout: Duration,
}

impl WorkerContext {
    /// 在有空闲槽位时依次启动排队任务
    fn dispatch(&self) {
        while let Some(admission) = self.pool.admit_next() {
            debug!(
                "任务 {} 获得执行槽位: slot_id={}",
                admission.job_id, admission.slot_id
            );
            tokio::spawn(run_worker(self.clone(), admission));
        }
    }

    /// 根据下载结果写入终态
    fn finish(&self, job_id: &str, outcome: DownloadOutcome) {
        let result = self.store.update(job_id, |job| {
            let applied = match &outcome {
                DownloadOutcome::Success(_) => job.mark_completed(),
                DownloadOutcome::Cancelled => job.mark_cancelled(),
                // 已请求取消时，进程被终止导致的失败记为取消
                DownloadOutcome::Failure(_) | DownloadOutcome::TimedOut(_)
                    if job.cancel_requested =>
                {
                    job.mark_cancelled()
                }
                DownloadOutcome::Failure(reason) => job.mark_failed(reason.clone()),
                DownloadOutcome::TimedOut(timeout) => {
                    job.mark_failed(format!("下载超时（{} 秒）", timeout.as_secs()))
                }
            };
            Ok((applied, job.status))
        });

        match result {
            Ok((true, JobStatus::Completed)) => info!("任务 {} 下载完成", job_id),
            Ok((true, JobStatus::Cancelled)) => info!("任务 {} 已取消", job_id),
            Ok((true, status)) => warn!("任务 {} 结束: {}", job_id, outcome_reason(&outcome, status)),
            Ok((false, status)) => debug!("任务 {} 已是 {} 状态，忽略下载结果", job_id, status),
            Err(e) => error!("写入任务 {} 结果失败: {}", job_id, e),
        }
    }
}

fn outcome_reason(outcome: &DownloadOutcome, status: JobStatus) -> String {
    match outcome {
        DownloadOutcome::Failure(reason) => format!("{} ({})", status, reason),
        DownloadOutcome::TimedOut(timeout) => format!("{} (超时 {:?})", status, timeout),
        _ => status.to_string(),
    }
}

async fn run_worker(ctx: WorkerContext, admission: Admission) {
    let Admission { job_id, slot_id } = admission;

    // 先登记令牌再切换状态，cancel() 看到 running 时一定能找到令牌
    let token = CancellationToken::new();
    ctx.tokens.lock().insert(job_id.clone(), token.clone());

    let claimed = ctx.store.update(&job_id, |job| {
        if job.mark_running() {
            Ok(Some((job.url.clone(), job.destination.clone())))
        } else {
            Ok(None)
        }
    });

    match claimed {
        Ok(Some((url, destination))) => {
            info!("开始下载任务 {}: url={}, 目标={:?}", job_id, url, destination);

            let outcome = AssertUnwindSafe(ctx.downloader.run(
                &url,
                &destination,
                ctx.job_timeout,
                token.clone(),
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!("任务 {} 的下载器发生 panic", job_id);
                DownloadOutcome::Failure("下载器内部错误".to_string())
            });

            ctx.finish(&job_id, outcome);
        }
        Ok(None) => debug!("任务 {} 在启动前已结束，跳过", job_id),
        Err(e) => warn!("启动任务 {} 失败: {}", job_id, e),
    }

    ctx.tokens.lock().remove(&job_id);
    // 终态写入之后才释放槽位
    ctx.pool.release(slot_id);
    ctx.dispatch();
}

/// 下载任务管理器
pub struct JobManager {
    ctx: WorkerContext,
    download_dir: PathBuf,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("download_dir", &self.download_dir)
            .field("max_concurrency", &self.ctx.pool.max_concurrency())
            .field("tracked_jobs", &self.ctx.store.len())
            .finish()
    }
}

impl JobManager {
    pub fn new(settings: ManagerSettings, downloader: Arc<dyn Downloader>) -> Self {
        info!(
            "创建任务管理器: 下载目录={:?}, 最大并发={}, 超时={:?}",
            settings.download_dir, settings.max_concurrent_jobs, settings.job_timeout
        );

        Self {
            ctx: WorkerContext {
                store: Arc::new(JobStore::new(settings.max_tracked_jobs)),
                pool: Arc::new(ExecutionPool::new(settings.max_concurrent_jobs)),
                downloader,
                tokens: Arc::new(Mutex::new(HashMap::new())),
                job_timeout: settings.job_timeout,
            },
            download_dir: settings.download_dir,
            cleanup_handle: Mutex::new(None),
        }
    }

    /// 按配置创建，使用 lux 作为下载器
    pub fn from_config(config: &DownloadConfig) -> Result<Self> {
        config.validate()?;
        config.ensure_download_dir_exists()?;

        let download_dir = dunce::canonicalize(&config.download_dir)
            .with_context(|| format!("无法解析下载目录: {:?}", config.download_dir))?;

        let downloader = LuxDownloader::new(
            config.downloader_binary.clone(),
            config.extra_args.clone(),
            download_dir.clone(),
        );

        Ok(Self::new(
            ManagerSettings {
                download_dir,
                max_concurrent_jobs: config.max_concurrent_jobs,
                job_timeout: config.job_timeout(),
                max_tracked_jobs: config.max_tracked_jobs,
            },
            Arc::new(downloader),
        ))
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// 提交下载任务，立即返回排队中的任务
    pub fn submit(&self, url: &str, filename: Option<&str>) -> JobResult<DownloadJob> {
        if !self.ctx.pool.is_accepting() {
            return Err(JobError::ShuttingDown);
        }

        let url = validate_url(url)?;
        let destination = resolve_destination(&self.download_dir, filename)?;
        let job = self.ctx.store.create(url, destination)?;

        if let Err(e) = self.ctx.pool.enqueue(&job.id) {
            // 与 shutdown 交错：任务已创建但不会再被执行
            let _ = self.ctx.store.update(&job.id, |j| Ok(j.mark_cancelled()));
            return Err(e);
        }

        info!(
            "创建下载任务: id={}, url={}, 目标={:?}",
            job.id, job.url, job.destination
        );
        self.ctx.dispatch();
        Ok(job)
    }

    pub fn get(&self, id: &str) -> JobResult<DownloadJob> {
        self.ctx.store.get(id)
    }

    pub fn list(&self, status: Option<JobStatus>) -> Vec<DownloadJob> {
        self.ctx.store.list(status)
    }

    /// 取消任务
    ///
    /// 排队中的任务立即取消；运行中的任务发出取消信号，返回的快照仍是 running，
    /// 进程退出后由 worker 写入终态
    pub fn cancel(&self, id: &str) -> JobResult<DownloadJob> {
        let job = self.ctx.store.update(id, |job| {
            match job.status {
                JobStatus::Queued => {
                    job.mark_cancelled();
                }
                JobStatus::Running => job.cancel_requested = true,
                status => {
                    return Err(JobError::NotCancellable {
                        id: job.id.clone(),
                        status,
                    })
                }
            }
            Ok(job.clone())
        })?;

        match job.status {
            JobStatus::Cancelled => {
                self.ctx.pool.remove_queued(id);
                info!("取消排队任务: {}", id);
            }
            _ => {
                if let Some(token) = self.ctx.tokens.lock().get(id) {
                    token.cancel();
                }
                info!("请求取消运行中的任务: {}", id);
            }
        }

        Ok(job)
    }

    pub fn summary(&self) -> JobSummary {
        let counts = self.ctx.store.counts();
        JobSummary {
            active_jobs: counts.running,
            queued_jobs: counts.queued,
        }
    }

    /// 调整最大并发数，扩容后立即启动排队任务
    pub fn set_max_concurrency(&self, max: usize) {
        self.ctx.pool.resize(max);
        self.ctx.dispatch();
    }

    /// 清理结束时间超过 `retention` 的终态任务，返回清理数量
    pub fn evict_expired(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let removed = self.ctx.store.remove_expired(cutoff);
        if !removed.is_empty() {
            info!("清理过期任务 {} 个", removed.len());
        }
        removed.len()
    }

    /// 启动定期清理任务
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration, retention: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.evict_expired(retention);
            }
        });

        if let Some(previous) = self.cleanup_handle.lock().replace(handle) {
            previous.abort();
        }
        info!("任务清理已启动: 间隔={:?}, 保留={:?}", interval, retention);
    }

    /// 优雅关闭
    ///
    /// 停止接受新任务并取消所有排队任务，最多等待 `grace` 让运行中的任务结束，
    /// 之后取消剩余任务
    pub async fn shutdown(&self, grace: Duration) {
        let drained = self.ctx.pool.close();
        for id in &drained {
            let _ = self.ctx.store.update(id, |j| Ok(j.mark_cancelled()));
        }
        info!(
            "任务管理器开始关闭: 取消排队任务 {} 个，等待运行中任务（最多 {:?}）",
            drained.len(),
            grace
        );

        if !self.ctx.pool.wait_idle(grace).await {
            let tokens: Vec<(String, CancellationToken)> = self
                .ctx
                .tokens
                .lock()
                .iter()
                .map(|(id, t)| (id.clone(), t.clone()))
                .collect();
            warn!("宽限期已过，强制取消 {} 个运行中的任务", tokens.len());

            for (id, token) in &tokens {
                let _ = self.ctx.store.update(id, |j| {
                    j.cancel_requested = true;
                    Ok(())
                });
                token.cancel();
            }

            if !self.ctx.pool.wait_idle(FORCED_CANCEL_WAIT).await {
                error!("部分下载进程未能及时退出");
            }

            // worker 没有写入终态的任务直接标记为取消
            for job in self.ctx.store.list(Some(JobStatus::Running)) {
                let _ = self.ctx.store.update(&job.id, |j| Ok(j.mark_cancelled()));
            }
        }

        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.abort();
        }
        info!("任务管理器已关闭");
    }
}

/// 校验 URL：去掉首尾空白，只接受 http/https
fn validate_url(raw: &str) -> JobResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(JobError::InvalidRequest("URL 不能为空".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| JobError::InvalidRequest(format!("URL 格式错误: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(JobError::InvalidRequest(format!(
                "不支持的协议: {}",
                other
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(JobError::InvalidRequest("URL 缺少主机名".to_string()));
    }

    Ok(trimmed.to_string())
}
