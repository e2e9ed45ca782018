// 目标路径解析
//
// 调用方给出的文件名必须落在下载目录内，防止路径穿越

use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use super::error::{JobError, JobResult};

/// 单个路径分量的最大字节数（Linux NAME_MAX）
const NAME_MAX: usize = 255;

/// URL 编码后的穿越序列
const ENCODED_TRAVERSAL: [&str; 2] = ["%2e%2e", "%252e%252e"];

/// 解析任务的目标路径
///
/// 未指定文件名时生成 UUID 作为文件名
pub fn resolve_destination(download_dir: &Path, filename: Option<&str>) -> JobResult<PathBuf> {
    match filename {
        None => Ok(download_dir.join(Uuid::new_v4().to_string())),
        Some(name) => {
            let relative = validate_filename(name)?;
            Ok(download_dir.join(relative))
        }
    }
}

/// 校验文件名并返回规范化后的相对路径
///
/// 允许 `shows/ep1.mp4` 这样的子目录，拒绝绝对路径和 `..`
pub fn validate_filename(name: &str) -> JobResult<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("文件名不能为空"));
    }

    if name.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(invalid("文件名包含控制字符"));
    }

    // Windows 分隔符在 Unix 上是普通字符，统一拒绝
    if name.contains('\\') {
        return Err(invalid("文件名不能包含反斜杠"));
    }

    let lower = name.to_lowercase();
    if ENCODED_TRAVERSAL.iter().any(|p| lower.contains(p)) {
        return Err(invalid("检测到路径穿越"));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                let part_str = part
                    .to_str()
                    .ok_or_else(|| invalid("文件名不是合法的 UTF-8"))?;
                if part_str.len() > NAME_MAX {
                    return Err(invalid("文件名过长"));
                }
                relative.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("检测到路径穿越")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("文件名必须是相对路径"))
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(invalid("文件名不能为空"));
    }

    Ok(relative)
}

fn invalid(reason: &str) -> JobError {
    JobError::InvalidRequest(reason.to_string())
}
