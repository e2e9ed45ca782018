use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use video_dl_service::{build_router, logging, AppConfig, AppState, JobManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置文件缺失时会写入默认配置
    let config_path = AppConfig::config_path();
    let config = AppConfig::load_or_default(&config_path).await;

    // 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&config.log);

    info!(
        "Video Download Service v{} 启动中... (配置文件: {})",
        env!("CARGO_PKG_VERSION"),
        config_path
    );

    let job_manager =
        Arc::new(JobManager::from_config(&config.download).context("初始化任务管理器失败")?);
    job_manager.start_cleanup_task(
        config.download.cleanup_interval(),
        config.download.job_retention(),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let grace = config.download.shutdown_grace();
    let app = build_router(AppState::new(job_manager.clone(), config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听地址失败: {}", addr))?;

    info!("服务器启动在: http://{}", addr);
    info!("下载目录: {:?}", job_manager.download_dir());

    // 使用 select! 监听关闭信号，支持优雅关闭
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始优雅关闭...");
        }
    }

    job_manager.shutdown(grace).await;
    info!("应用已安全退出");

    Ok(())
}
