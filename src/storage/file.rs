//! File references accepted by `put` / `put_file` / 上传文件引用

use std::io::Read;
use std::path::{Path, PathBuf};

use super::ReadStream;
use crate::utils::{get_ext, random_string};

/// A readable file source with a collision-resistant name generator
/// 可读取的文件来源，并能生成不冲突的文件名
pub trait FileReference: Send + Sync {
    /// Open a fresh byte source / 打开新的字节流
    fn open(&self) -> std::io::Result<ReadStream>;

    /// Original client-side name, if any / 原始文件名
    fn original_name(&self) -> Option<String> {
        None
    }

    /// Guessed extension without the dot / 推测的扩展名（不含点）
    fn extension(&self) -> Option<String> {
        None
    }

    /// 40 random alphanumerics plus the guessed extension / 40位随机字符加扩展名
    fn hash_name(&self) -> String {
        let hash = random_string(40);
        match self.extension() {
            Some(ext) if !ext.is_empty() => format!("{}.{}", hash, ext),
            _ => hash,
        }
    }
}

/// File on the local filesystem / 本地文件
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileReference for LocalFile {
    fn open(&self) -> std::io::Result<ReadStream> {
        let file = std::fs::File::open(&self.path)?;
        Ok(Box::new(file) as Box<dyn Read + Send>)
    }

    fn original_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    }

    fn extension(&self) -> Option<String> {
        let ext = get_ext(&self.path.to_string_lossy());
        if !ext.is_empty() {
            return Some(ext);
        }
        // No extension on disk: fall back to the first extension of a guessed type
        mime_guess::from_path(&self.path)
            .first()
            .and_then(|mime| mime_guess::get_mime_extensions(&mime))
            .and_then(|exts| exts.first())
            .map(|ext| ext.to_string())
    }
}
