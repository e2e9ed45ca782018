// 应用状态

use crate::config::AppConfig;
use crate::downloader::JobManager;
use std::sync::Arc;

/// 应用全局状态
#[derive(Debug, Clone)]
pub struct AppState {
    /// 下载任务管理器
    pub job_manager: Arc<JobManager>,
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(job_manager: Arc<JobManager>, config: AppConfig) -> Self {
        Self {
            job_manager,
            config: Arc::new(config),
        }
    }
}
