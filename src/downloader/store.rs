//! 任务存储
//!
//! 进程内的 任务ID -> 任务 映射，所有修改都经过 [`JobStore::update`]，
//! 在同一把写锁内完成读取-修改-写回，取消请求和 worker 的完成写入不会互相覆盖。
//! 锁是同步锁，持有期间不允许 `.await`。

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use super::error::{JobError, JobResult};
use super::task::{DownloadJob, JobStatus};

/// 默认最多跟踪的任务数
pub const DEFAULT_MAX_TRACKED_JOBS: usize = 10_000;

/// 各状态任务数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<String, DownloadJob>,
    /// 按创建顺序排列的任务ID
    order: VecDeque<String>,
}

/// 任务存储
#[derive(Debug)]
pub struct JobStore {
    inner: RwLock<StoreInner>,
    max_jobs: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACKED_JOBS)
    }
}

impl JobStore {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            max_jobs,
        }
    }

    /// 创建任务（初始状态 Queued）
    ///
    /// 目标路径冲突检查和插入在同一把锁内完成
    pub fn create(&self, url: String, destination: PathBuf) -> JobResult<DownloadJob> {
        let mut inner = self.inner.write();

        if inner.jobs.len() >= self.max_jobs {
            return Err(JobError::StoreUnavailable(format!(
                "已跟踪 {} 个任务，达到上限",
                inner.jobs.len()
            )));
        }

        if let Some(holder) = inner
            .jobs
            .values()
            .find(|j| !j.is_terminal() && j.destination == destination)
        {
            return Err(JobError::DuplicateDestination {
                destination: destination.display().to_string(),
                job_id: holder.id.clone(),
            });
        }

        let job = DownloadJob::new(url, destination);
        inner.order.push_back(job.id.clone());
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// 获取任务快照
    pub fn get(&self, id: &str) -> JobResult<DownloadJob> {
        self.inner
            .read()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// 原子地修改任务
    ///
    /// 闭包在任务副本上执行，返回 Err 时不写回，修改要么全部生效要么不生效
    pub fn update<F, R>(&self, id: &str, mutation: F) -> JobResult<R>
    where
        F: FnOnce(&mut DownloadJob) -> JobResult<R>,
    {
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let mut draft = job.clone();
        let result = mutation(&mut draft)?;
        *job = draft;
        Ok(result)
    }

    /// 按创建顺序列出任务，可按状态过滤
    pub fn list(&self, status: Option<JobStatus>) -> Vec<DownloadJob> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect()
    }

    /// 统计排队中和运行中的任务数
    pub fn counts(&self) -> JobCounts {
        let inner = self.inner.read();
        inner
            .jobs
            .values()
            .fold(JobCounts::default(), |mut acc, job| {
                match job.status {
                    JobStatus::Queued => acc.queued += 1,
                    JobStatus::Running => acc.running += 1,
                    _ => {}
                }
                acc
            })
    }

    /// 移除结束时间早于 `cutoff` 的终态任务，返回被移除的任务ID
    pub fn remove_expired(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut inner = self.inner.write();

        let expired: Vec<String> = inner
            .jobs
            .values()
            .filter(|j| j.is_terminal() && j.finished_at.map_or(false, |t| t < cutoff))
            .map(|j| j.id.clone())
            .collect();

        if expired.is_empty() {
            return expired;
        }

        for id in &expired {
            inner.jobs.remove(id);
        }
        let StoreInner { jobs, order } = &mut *inner;
        order.retain(|id| jobs.contains_key(id));

        expired
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn dest(name: &str) -> PathBuf {
        PathBuf::from("/downloads").join(name)
    }

    #[test]
    fn test_create_and_get() {
        let store = JobStore::default();
        let job = store
            .create("https://example.com/v.mp4".to_string(), dest("a.mp4"))
            .unwrap();

        let fetched = store.get(&job.id).unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_unknown() {
        let store = JobStore::default();
        assert_eq!(
            store.get("nope").unwrap_err(),
            JobError::NotFound("nope".to_string())
        );
    }

    #[test]
    fn test_duplicate_destination_only_while_active() {
        let store = JobStore::default();
        let first = store
            .create("https://example.com/1".to_string(), dest("a.mp4"))
            .unwrap();

        let err = store
            .create("https://example.com/2".to_string(), dest("a.mp4"))
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateDestination { ref job_id, .. } if *job_id == first.id));

        store
            .update(&first.id, |j| {
                j.mark_cancelled();
                Ok(())
            })
            .unwrap();

        // 前一个任务已结束，可以复用路径
        assert!(store
            .create("https://example.com/3".to_string(), dest("a.mp4"))
            .is_ok());
    }

    #[test]
    fn test_failed_update_is_not_applied() {
        let store = JobStore::default();
        let job = store
            .create("https://example.com/v".to_string(), dest("v"))
            .unwrap();

        let result: JobResult<()> = store.update(&job.id, |j| {
            j.mark_running();
            Err(JobError::InvalidRequest("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_list_keeps_creation_order_and_filters() {
        let store = JobStore::default();
        let a = store.create("https://e.com/a".to_string(), dest("a")).unwrap();
        let b = store.create("https://e.com/b".to_string(), dest("b")).unwrap();
        let c = store.create("https://e.com/c".to_string(), dest("c")).unwrap();
        store
            .update(&b.id, |j| {
                j.mark_running();
                Ok(())
            })
            .unwrap();

        let ids: Vec<String> = store.list(None).into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        let queued: Vec<String> = store
            .list(Some(JobStatus::Queued))
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(queued, vec![a.id, c.id]);

        assert_eq!(store.counts(), JobCounts { queued: 2, running: 1 });
    }

    #[test]
    fn test_remove_expired_only_terminal() {
        let store = JobStore::default();
        let done = store.create("https://e.com/a".to_string(), dest("a")).unwrap();
        let pending = store.create("https://e.com/b".to_string(), dest("b")).unwrap();
        store
            .update(&done.id, |j| {
                j.mark_cancelled();
                Ok(())
            })
            .unwrap();

        let removed = store.remove_expired(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, vec![done.id.clone()]);
        assert!(store.get(&done.id).is_err());
        assert!(store.get(&pending.id).is_ok());
        assert_eq!(store.list(None).len(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let store = JobStore::new(1);
        store.create("https://e.com/a".to_string(), dest("a")).unwrap();
        let err = store
            .create("https://e.com/b".to_string(), dest("b"))
            .unwrap_err();
        assert!(matches!(err, JobError::StoreUnavailable(_)));
    }

    #[test]
    fn test_concurrent_cancel_and_complete_never_both_win() {
        for _ in 0..50 {
            let store = Arc::new(JobStore::default());
            let job = store.create("https://e.com/v".to_string(), dest("v")).unwrap();
            store
                .update(&job.id, |j| {
                    j.mark_running();
                    Ok(())
                })
                .unwrap();

            let s1 = store.clone();
            let id1 = job.id.clone();
            let completer = std::thread::spawn(move || {
                s1.update(&id1, |j| Ok(j.mark_completed())).unwrap()
            });
            let s2 = store.clone();
            let id2 = job.id.clone();
            let canceller = std::thread::spawn(move || {
                s2.update(&id2, |j| Ok(j.mark_cancelled())).unwrap()
            });

            let completed = completer.join().unwrap();
            let cancelled = canceller.join().unwrap();
            assert!(completed ^ cancelled);
            assert!(store.get(&job.id).unwrap().is_terminal());
        }
    }
}
