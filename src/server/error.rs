// API 错误响应

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::downloader::JobError;

/// 错误响应体
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: i32,
    message: String,
}

/// API 错误
#[derive(Debug)]
pub enum ApiError {
    /// 任务管理错误
    Job(JobError),
    /// 请求体或查询参数无法解析
    BadRequest(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Job(err) => match err {
                JobError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                JobError::NotFound(_) => StatusCode::NOT_FOUND,
                JobError::DuplicateDestination { .. } => StatusCode::CONFLICT,
                JobError::NotCancellable { .. } => StatusCode::CONFLICT,
                JobError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                JobError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> i32 {
        match self {
            Self::BadRequest(_) => JobError::InvalidRequest(String::new()).code(),
            Self::Job(err) => err.code(),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self::Job(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(format!("请求体格式错误: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(format!("查询参数错误: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            Self::Job(err) => err.to_string(),
            Self::BadRequest(msg) => msg,
        };

        if status.is_server_error() {
            error!("请求处理失败: {}", message);
        } else {
            warn!("请求被拒绝: {} {}", status.as_u16(), message);
        }

        (status, Json(ErrorResponse { code, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::JobStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (JobError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (JobError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                JobError::DuplicateDestination {
                    destination: "a".into(),
                    job_id: "b".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                JobError::NotCancellable {
                    id: "x".into(),
                    status: JobStatus::Failed,
                },
                StatusCode::CONFLICT,
            ),
            (JobError::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
            (
                JobError::StoreUnavailable("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_bad_request_uses_invalid_request_code() {
        let err = ApiError::BadRequest("broken".into());
        assert_eq!(err.code(), 40001);
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
