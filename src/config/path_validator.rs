// 下载目录检查

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// 下载目录不可用的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirProblem {
    /// 路径不存在
    Missing,
    /// 路径存在但不是目录
    NotADirectory,
    /// 目录不可写（下载器无法在其中创建文件）
    ReadOnly,
}

impl fmt::Display for DirProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Missing => "路径不存在",
            Self::NotADirectory => "路径不是目录",
            Self::ReadOnly => "目录没有写入权限",
        };
        f.write_str(text)
    }
}

/// 下载目录检查器
pub struct PathValidator;

impl PathValidator {
    /// 检查目录能否作为下载目录，可用时返回 None
    pub fn inspect(path: &Path) -> Option<DirProblem> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return Some(DirProblem::Missing),
        };
        if !metadata.is_dir() {
            return Some(DirProblem::NotADirectory);
        }
        if !Self::can_write(path) {
            return Some(DirProblem::ReadOnly);
        }
        None
    }

    /// 实际创建一个探测文件再删除
    fn can_write(dir: &Path) -> bool {
        let marker = dir.join(format!(".write-check-{}", Uuid::new_v4()));
        match fs::OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => {
                let _ = fs::remove_file(&marker);
                true
            }
            Err(_) => false,
        }
    }

    /// 确保下载目录存在且可写，必要时创建
    pub fn prepare_download_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).with_context(|| format!("无法创建下载目录: {:?}", path))?;
            tracing::info!("已创建下载目录: {:?}", path);
        }

        if let Some(problem) = Self::inspect(path) {
            anyhow::bail!("下载目录 {:?} 不可用: {}", path, problem);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writable_directory() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(PathValidator::inspect(temp_dir.path()), None);
        // 探测文件不应残留
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert_eq!(PathValidator::inspect(&missing), Some(DirProblem::Missing));
    }

    #[test]
    fn test_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("video.mp4");
        fs::write(&file_path, "data").unwrap();

        assert_eq!(
            PathValidator::inspect(&file_path),
            Some(DirProblem::NotADirectory)
        );
        let err = PathValidator::prepare_download_dir(&file_path).unwrap_err();
        assert!(err.to_string().contains("路径不是目录"));
    }

    #[test]
    fn test_prepare_creates_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");

        PathValidator::prepare_download_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
