use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::downloader::{DownloadJob, JobStatus};
use crate::server::error::ApiError;
use crate::server::AppState;

/// 创建下载任务请求
#[derive(Debug, Deserialize)]
pub struct CreateDownloadRequest {
    /// 视频地址
    pub url: String,
    /// 保存文件名（相对下载目录），不填则自动生成
    #[serde(default)]
    pub filename: Option<String>,
}

/// 创建下载任务响应
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDownloadResponse {
    pub id: String,
    pub status: JobStatus,
}

/// 任务列表过滤参数
#[derive(Debug, Deserialize)]
pub struct ListDownloadsQuery {
    pub status: Option<JobStatus>,
}

/// 对外展示的任务视图
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub url: String,
    pub status: JobStatus,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// 已请求取消，等待下载进程退出
    pub cancel_requested: bool,
}

impl From<DownloadJob> for JobView {
    fn from(job: DownloadJob) -> Self {
        Self {
            id: job.id,
            url: job.url,
            status: job.status,
            destination: job.destination.display().to_string(),
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            cancel_requested: job.cancel_requested,
        }
    }
}

/// POST /downloads
/// 创建下载任务，立即返回
pub async fn create_download(
    State(app_state): State<AppState>,
    payload: Result<Json<CreateDownloadRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<(StatusCode, Json<CreateDownloadResponse>), ApiError> {
    let Json(req) = payload?;

    let job = app_state
        .job_manager
        .submit(&req.url, req.filename.as_deref())?;

    Ok((
        StatusCode::CREATED,
        Json(CreateDownloadResponse {
            id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /downloads?status=running
/// 获取任务列表
pub async fn list_downloads(
    State(app_state): State<AppState>,
    query: Result<Query<ListDownloadsQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let Query(query) = query?;
    let jobs = app_state.job_manager.list(query.status);
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// GET /downloads/:id
/// 获取任务详情
pub async fn get_download(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = app_state.job_manager.get(&id)?;
    Ok(Json(job.into()))
}

/// POST /downloads/:id/cancel
/// 取消任务
pub async fn cancel_download(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = app_state.job_manager.cancel(&id)?;
    Ok(Json(job.into()))
}
