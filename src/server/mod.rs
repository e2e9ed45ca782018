// Web服务器模块

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// 构建 HTTP 路由
pub fn build_router(app_state: AppState) -> Router {
    // 配置中间件层
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    Router::new()
        .route(
            "/downloads",
            post(handlers::create_download).get(handlers::list_downloads),
        )
        .route("/downloads/:id", get(handlers::get_download))
        .route("/downloads/:id/cancel", post(handlers::cancel_download))
        .route("/status", get(handlers::get_status))
        .with_state(app_state)
        .layer(middleware)
}
