// 配置管理模块

pub mod path_validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

pub use path_validator::{DirProblem, PathValidator};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 覆盖配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "APP_CONFIG";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 下载目录（所有任务的文件都落在此目录内）
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// 外部下载器可执行文件
    #[serde(default = "default_downloader_binary")]
    pub downloader_binary: PathBuf,
    /// 追加在 `-o <path> <url>` 之前的固定参数
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// 最大同时下载任务数
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// 单个任务超时（秒）
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// 优雅关闭等待时间（秒）
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// 终态任务在内存中保留的时间（秒）
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
    /// 过期任务清理间隔（秒）
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// 内存中最多跟踪的任务数
    #[serde(default = "default_max_tracked_jobs")]
    pub max_tracked_jobs: usize,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_downloader_binary() -> PathBuf {
    PathBuf::from("lux")
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_max_tracked_jobs() -> usize {
    crate::downloader::store::DEFAULT_MAX_TRACKED_JOBS
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            downloader_binary: default_downloader_binary(),
            extra_args: Vec::new(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            job_retention_secs: default_job_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_tracked_jobs: default_max_tracked_jobs(),
        }
    }
}

impl DownloadConfig {
    /// 校验数值范围
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs 必须大于 0");
        }
        if self.job_timeout_secs == 0 {
            anyhow::bail!("job_timeout_secs 必须大于 0");
        }
        if self.max_tracked_jobs == 0 {
            anyhow::bail!("max_tracked_jobs 必须大于 0");
        }
        if self.downloader_binary.as_os_str().is_empty() {
            anyhow::bail!("downloader_binary 不能为空");
        }
        Ok(())
    }

    /// 确保下载目录存在且可写
    pub fn ensure_download_dir_exists(&self) -> Result<()> {
        PathValidator::prepare_download_dir(&self.download_dir)?;

        tracing::info!("下载目录已准备就绪: {:?}", self.download_dir);
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        // 0 会让 tokio::time::interval panic
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            download: DownloadConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 配置文件路径（优先读取环境变量）
    pub fn config_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .download
            .validate()
            .context("配置文件中的下载配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    ///
    /// 文件不存在时写出默认配置；文件存在但无法解析时只告警，不覆盖用户文件
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
