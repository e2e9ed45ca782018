use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// 下载任务状态
///
/// 状态只能单向前进：Queued -> Running -> {Completed, Failed, Cancelled}，
/// 或 Queued -> Cancelled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 排队中
    Queued,
    /// 下载中
    Running,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下载任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    /// 任务ID
    pub id: String,
    /// 视频地址
    pub url: String,
    /// 本地保存路径
    pub destination: PathBuf,
    /// 任务状态
    pub status: JobStatus,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始时间
    pub started_at: Option<DateTime<Utc>>,
    /// 结束时间
    pub finished_at: Option<DateTime<Utc>>,
    /// 错误信息（仅失败时存在）
    pub error: Option<String>,
    /// 运行中的任务已被请求取消，等待进程终止
    #[serde(default)]
    pub cancel_requested: bool,
}

impl DownloadJob {
    pub fn new(url: String, destination: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url,
            destination,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 时间戳不早于 `floor`，墙上时钟回拨时保持 created ≤ started ≤ finished
    fn now_not_before(floor: DateTime<Utc>) -> DateTime<Utc> {
        Utc::now().max(floor)
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// 标记为下载中，只有排队中的任务可以开始
    pub fn mark_running(&mut self) -> bool {
        if !self.transition(JobStatus::Running) {
            return false;
        }
        self.started_at = Some(Self::now_not_before(self.created_at));
        true
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) -> bool {
        if !self.transition(JobStatus::Completed) {
            return false;
        }
        self.finish();
        true
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) -> bool {
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        self.error = Some(error);
        self.finish();
        true
    }

    /// 标记为已取消
    pub fn mark_cancelled(&mut self) -> bool {
        if !self.transition(JobStatus::Cancelled) {
            return false;
        }
        self.finish();
        true
    }

    fn finish(&mut self) {
        let floor = self.started_at.unwrap_or(self.created_at);
        self.finished_at = Some(Self::now_not_before(floor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> DownloadJob {
        DownloadJob::new(
            "https://example.com/v.mp4".to_string(),
            PathBuf::from("./downloads/v.mp4"),
        )
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
        assert!(job.error.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_unique_ids() {
        assert_ne!(job().id, job().id);
    }

    #[test]
    fn test_happy_path_timestamps() {
        let mut job = job();
        assert!(job.mark_running());
        assert!(job.mark_completed());

        let started = job.started_at.unwrap();
        let finished = job.finished_at.unwrap();
        assert!(job.created_at <= started);
        assert!(started <= finished);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_failed_records_error() {
        let mut job = job();
        job.mark_running();
        assert!(job.mark_failed("404 not found".to_string()));
        assert_eq!(job.error.as_deref(), Some("404 not found"));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_queued_cannot_complete_directly() {
        let mut job = job();
        assert!(!job.mark_completed());
        assert!(!job.mark_failed("x".to_string()));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_cancel_from_queued_skips_started_at() {
        let mut job = job();
        assert!(job.mark_cancelled());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_some());
        assert!(!job.mark_running());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.mark_running();
        job.mark_completed();
        let finished = job.finished_at;

        assert!(!job.mark_cancelled());
        assert!(!job.mark_failed("late".to_string()));
        assert!(!job.mark_running());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.finished_at, finished);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        let status: JobStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(status, JobStatus::Running);
    }
}
