/// Path processing utility functions / 路径处理工具函数

use anyhow::{anyhow, Result};

/// Normalize a logical path / 规范化逻辑路径
/// 1. Replace backslashes with forward slashes / 将反斜杠替换为正斜杠
/// 2. Clean `.`, `..` and duplicate `/` / 清理 . 和 .. 和重复的 /
/// 3. Strip leading and trailing `/` / 去除首尾的 /
///
/// Fails when `..` climbs above the root / 路径超出根目录时报错
pub fn normalize_path(path: &str) -> Result<String> {
    let path = path.replace('\\', "/");
    if path.chars().any(|c| c.is_control() && c != '\t') {
        return Err(anyhow!("Corrupted path detected: {:?}", path));
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if parts.pop().is_none() {
                    return Err(anyhow!("Path traversal detected: {}", path));
                }
            }
            _ => parts.push(part),
        }
    }

    Ok(parts.join("/"))
}

/// Join a base URL and a path with exactly one slash / 拼接 URL 与路径
pub fn concat_path_to_url(url: &str, path: &str) -> String {
    format!("{}/{}", url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Last path segment / 获取路径最后一段
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}

/// Parent of a logical path, "" for top-level entries / 获取父目录
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[..pos],
        None => "",
    }
}

/// Get file extension (lowercase) / 获取文件扩展名
pub fn get_ext(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// ASCII fallback for a download filename / 下载文件名的 ASCII 回退
/// Non-ASCII characters are transliterated, `%` removed / 非 ASCII 字符转写，去除 %
pub fn fallback_name(name: &str) -> String {
    deunicode::deunicode(name).replace('%', "")
}

/// Random alphanumeric string / 随机字母数字字符串
pub fn random_string(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Platform line separator / 平台换行符
pub fn line_separator() -> &'static str {
    if cfg!(windows) {
        "\r\n"
    } else {
        "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("").unwrap(), "");
        assert_eq!(normalize_path(".").unwrap(), "");
        assert_eq!(normalize_path("/").unwrap(), "");
        assert_eq!(normalize_path("a/b/c").unwrap(), "a/b/c");
        assert_eq!(normalize_path("/a/b/c/").unwrap(), "a/b/c");
        assert_eq!(normalize_path("a\\b\\c").unwrap(), "a/b/c");
        assert_eq!(normalize_path("/a//b///c").unwrap(), "a/b/c");
        assert_eq!(normalize_path("/a/./b/../c").unwrap(), "a/c");
        // Whitespace segments are names, not separators or dot segments
        assert_eq!(normalize_path("a/ /b.txt").unwrap(), "a/ /b.txt");
        assert_eq!(normalize_path("x/.. /y.txt").unwrap(), "x/.. /y.txt");
        assert_eq!(normalize_path(" ./a").unwrap(), " ./a");
    }

    #[test]
    fn test_normalize_path_rejects_traversal() {
        assert!(normalize_path("..").is_err());
        assert!(normalize_path("a/../../b").is_err());
        assert!(normalize_path("a\0b").is_err());
    }

    #[test]
    fn test_concat_path_to_url() {
        assert_eq!(concat_path_to_url("https://cdn.test/", "/a/b.png"), "https://cdn.test/a/b.png");
        assert_eq!(concat_path_to_url("/storage", "avatar.png"), "/storage/avatar.png");
    }

    #[test]
    fn test_basename_and_dirname() {
        assert_eq!(basename("docs/report.pdf"), "report.pdf");
        assert_eq!(basename("report.pdf"), "report.pdf");
        assert_eq!(dirname("docs/2024/report.pdf"), "docs/2024");
        assert_eq!(dirname("report.pdf"), "");
    }

    #[test]
    fn test_fallback_name() {
        assert_eq!(fallback_name("report.pdf"), "report.pdf");
        assert_eq!(fallback_name("100%.txt"), "100.txt");
        assert_eq!(fallback_name("café.txt"), "cafe.txt");
        assert!(fallback_name("报告.pdf").is_ascii());
    }

    #[test]
    fn test_random_string() {
        let s = random_string(40);
        assert_eq!(s.len(), 40);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
