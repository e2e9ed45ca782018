//! 日志系统
//!
//! 控制台 + 文件两路输出。文件按进程启动时间命名，超过大小上限时滚动为
//! `video-dl.<启动时间>_<序号>.log`，启动时删除超过保留天数的旧文件。

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_PREFIX: &str = "video-dl.";
const LOG_FILE_SUFFIX: &str = ".log";
/// 启动时间戳格式，日期部分用于过期判断
const STAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";
const TIMER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

struct RollingState {
    dir: PathBuf,
    stamp: String,
    /// 0 为首个文件，之后每次滚动加 1
    index: u32,
    written: u64,
    limit: u64,
    file: Option<File>,
}

impl RollingState {
    fn path_for(&self, index: u32) -> PathBuf {
        let name = match index {
            0 => format!("{}{}{}", LOG_FILE_PREFIX, self.stamp, LOG_FILE_SUFFIX),
            n => format!("{}{}_{}{}", LOG_FILE_PREFIX, self.stamp, n, LOG_FILE_SUFFIX),
        };
        self.dir.join(name)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let path = self.path_for(self.index);
        self.file = Some(OpenOptions::new().create(true).append(true).open(path)?);
        self.written = 0;
        Ok(())
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 单条超过上限的记录也整条写进当前文件
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            if let Some(mut old) = self.file.take() {
                old.flush()?;
            }
            self.index += 1;
            self.open_current()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 按大小滚动的日志文件，作为 `tracing_appender::non_blocking` 的写入目标
#[derive(Clone)]
pub struct RollingLogFile {
    state: Arc<Mutex<RollingState>>,
}

impl RollingLogFile {
    pub fn open(dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let mut state = RollingState {
            dir,
            stamp: Local::now().format(STAMP_FORMAT).to_string(),
            index: 0,
            written: 0,
            limit: max_file_size,
            file: None,
        };
        state.open_current()?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }
}

impl Write for RollingLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 日志守卫，drop 时刷新文件写入线程
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化全局日志，`RUST_LOG` 优先于配置中的级别
///
/// 文件输出无法建立时退回到仅控制台
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let console = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()));

    let writer = if config.enabled {
        fs::create_dir_all(&config.log_dir)
            .and_then(|_| RollingLogFile::open(config.log_dir.clone(), config.max_file_size))
            .map_err(|e| eprintln!("日志文件不可用 {:?}: {}，仅输出到控制台", config.log_dir, e))
            .ok()
    } else {
        None
    };

    let Some(writer) = writer else {
        tracing_subscriber::registry().with(filter).with(console).init();
        info!("日志系统初始化完成（仅控制台）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    let file = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 级别={}, 保留 {} 天, 单文件上限 {} 字节",
        config.log_dir, config.level, config.retention_days, config.max_file_size
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days);
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(guard),
    }
}

/// 从日志文件名解析启动日期；不是本服务的日志文件时返回 None
fn log_file_date(filename: &str) -> Option<Option<NaiveDate>> {
    let stem = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    // YYYY-MM-DD-HHMMSS[_N]
    let date = stem
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    Some(date)
}

/// 删除超过保留天数的日志文件，返回删除数量
///
/// 文件名里没有可解析的日期时按修改时间判断
fn cleanup_old_logs(dir: &Path, retention_days: u32) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("读取日志目录失败 {:?}: {}", dir, e);
            return 0;
        }
    };

    let retention = chrono::Duration::days(i64::from(retention_days));
    let today = Local::now().date_naive();
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(log_file_date)
        else {
            continue;
        };

        let expired = match date {
            Some(date) => today.signed_duration_since(date) > retention,
            None => modified_before(&entry, retention),
        };
        if !expired || !path.is_file() {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("已删除过期日志: {:?}", path);
                removed += 1;
            }
            Err(e) => warn!("删除过期日志失败 {:?}: {}", path, e),
        }
    }

    removed
}

fn modified_before(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    chrono::Duration::from_std(age).map_or(false, |age| age > retention)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_date() {
        assert_eq!(
            log_file_date("video-dl.2026-01-02-101500.log"),
            Some(NaiveDate::from_ymd_opt(2026, 1, 2))
        );
        assert_eq!(
            log_file_date("video-dl.2026-01-02-101500_3.log"),
            Some(NaiveDate::from_ymd_opt(2026, 1, 2))
        );
        assert_eq!(log_file_date("video-dl.garbage.log"), Some(None));
        assert_eq!(log_file_date("other.2026-01-02.log"), None);
    }

    #[test]
    fn test_rolls_over_when_full() {
        let dir = TempDir::new().unwrap();
        let mut log = RollingLogFile::open(dir.path().to_path_buf(), 16).unwrap();

        log.write_all(b"0123456789").unwrap();
        log.write_all(b"0123456789").unwrap();
        log.flush().unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[1].ends_with("_1.log"));
    }

    #[test]
    fn test_oversized_record_is_not_split() {
        let dir = TempDir::new().unwrap();
        let mut log = RollingLogFile::open(dir.path().to_path_buf(), 4).unwrap();
        log.write_all(b"longer than the limit").unwrap();
        log.flush().unwrap();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_cleanup_keeps_recent_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("video-dl.2000-01-01-000000.log");
        let recent = dir
            .path()
            .join(format!("video-dl.{}.log", Local::now().format(STAMP_FORMAT)));
        let foreign = dir.path().join("notes.txt");
        for path in [&old, &recent, &foreign] {
            fs::write(path, "x").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path(), 7), 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(foreign.exists());
    }
}
