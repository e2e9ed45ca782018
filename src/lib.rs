// Video Download Service Library
// 视频下载服务核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 下载任务模块
pub mod downloader;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{DownloadJob, JobError, JobManager, JobStatus};
pub use server::{build_router, AppState};
