// 任务管理错误类型

use thiserror::Error;

use super::task::JobStatus;

/// 任务管理错误
///
/// 下载层面的失败（超时、进程退出码非 0）不属于这里，
/// 它们作为 `DownloadOutcome` 记录在任务上，由调用方轮询得到
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// 请求参数不合法（URL 或文件名）
    #[error("请求无效: {0}")]
    InvalidRequest(String),

    /// 目标路径已被未结束的任务占用
    #[error("目标文件已被任务 {job_id} 占用: {destination}")]
    DuplicateDestination { destination: String, job_id: String },

    /// 任务不存在
    #[error("任务不存在: {0}")]
    NotFound(String),

    /// 任务已处于终态，不能取消
    #[error("任务 {id} 当前状态为 {status}，无法取消")]
    NotCancellable { id: String, status: JobStatus },

    /// 服务正在关闭，不再接受新任务
    #[error("服务正在关闭，不再接受新任务")]
    ShuttingDown,

    /// 任务存储不可用
    #[error("任务存储不可用: {0}")]
    StoreUnavailable(String),
}

impl JobError {
    /// 稳定的数字错误码，供 HTTP 层返回
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => 40001,
            Self::NotFound(_) => 40401,
            Self::DuplicateDestination { .. } => 40901,
            Self::NotCancellable { .. } => 40902,
            Self::StoreUnavailable(_) => 50001,
            Self::ShuttingDown => 50301,
        }
    }
}

pub type JobResult<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = JobError::NotCancellable {
            id: "abc".to_string(),
            status: JobStatus::Completed,
        };
        assert_eq!(err.to_string(), "任务 abc 当前状态为 completed，无法取消");
        assert_eq!(err.code(), 40902);

        let err = JobError::InvalidRequest("URL 不能为空".to_string());
        assert_eq!(err.to_string(), "请求无效: URL 不能为空");
    }
}
