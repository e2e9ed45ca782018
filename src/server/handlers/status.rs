use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crate::server::AppState;

/// 服务状态
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(rename = "activeJobs")]
    pub active_jobs: usize,
    #[serde(rename = "queuedJobs")]
    pub queued_jobs: usize,
    /// 配置中的下载目录
    pub downloads_dir: String,
}

/// GET /status
pub async fn get_status(State(app_state): State<AppState>) -> Json<StatusResponse> {
    let summary = app_state.job_manager.summary();
    Json(StatusResponse {
        status: "online".to_string(),
        active_jobs: summary.active_jobs,
        queued_jobs: summary.queued_jobs,
        downloads_dir: app_state.config.download.download_dir.display().to_string(),
    })
}
