use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

/// Caller-owned read handle, released on drop / 调用方持有的读取句柄，drop 时释放
pub type ReadStream = Box<dyn Read + Send>;

/// File visibility at the uniform layer / 统一层的文件可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(anyhow::anyhow!("Unknown visibility: {}", other)),
        }
    }
}

/// Listing entry / 列表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Path relative to the adapter root, no leading slash / 相对根目录的路径
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl Entry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size: Some(size),
            last_modified: None,
            visibility: None,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            size: None,
            last_modified: None,
            visibility: None,
        }
    }

    pub fn modified(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_modified = at;
        self
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir
    }
}

/// Write options / 写入选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    pub visibility: Option<Visibility>,
    pub directory_visibility: Option<Visibility>,
    pub mime_type: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visibility(mut self, val: Visibility) -> Self {
        self.visibility = Some(val);
        self
    }

    pub fn directory_visibility(mut self, val: Visibility) -> Self {
        self.directory_visibility = Some(val);
        self
    }

    pub fn mime_type(mut self, val: &str) -> Self {
        self.mime_type = Some(val.to_string());
        self
    }
}

impl From<Visibility> for WriteOptions {
    fn from(visibility: Visibility) -> Self {
        WriteOptions::new().visibility(visibility)
    }
}

/// URL rules a backend family follows when it has no URL generator of its own
/// 后端没有自己的 URL 生成能力时遵循的规则族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlFamily {
    /// FTP/SFTP style: base url + path, else the raw path / FTP/SFTP 风格
    RemoteTransfer,
    /// Local disk: base url + path, else `/storage/<path>` / 本地磁盘
    Local,
}

/// Capability: public URL resolution / 能力：公开 URL 生成
pub trait PublicUrlGenerator: Send + Sync {
    fn public_url(&self, path: &str) -> String;
}

/// Capability: expiring URL resolution / 能力：临时 URL 生成
pub trait TemporaryUrlGenerator: Send + Sync {
    fn temporary_url(&self, path: &str, expires_at: DateTime<Utc>) -> Result<String>;
}

/// Storage adapter interface (primitive operations only) / 存储适配器接口（只提供原语）
///
/// Paths are logical and already normalized: no leading slash, no `..`.
/// Each adapter maps them to its physical location through its own root.
pub trait StorageAdapter: Send + Sync {
    /// Adapter name, used in logs / 适配器名称
    fn name(&self) -> &str;

    fn file_exists(&self, path: &str) -> Result<bool>;

    fn directory_exists(&self, path: &str) -> Result<bool>;

    /// Read complete content (default implementation: drain the reader) / 读取完整内容
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.open_reader(path)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Open a read handle; ownership goes to the caller / 打开读取句柄
    fn open_reader(&self, path: &str) -> Result<ReadStream>;

    /// Write complete content (default implementation: stream from a cursor) / 写入完整内容
    fn write(&self, path: &str, contents: &[u8], options: &WriteOptions) -> Result<()> {
        let mut cursor = Cursor::new(contents);
        self.write_stream(path, &mut cursor, options)
    }

    /// Write everything the reader yields / 流式写入
    fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> Result<()>;

    fn delete(&self, path: &str) -> Result<()>;

    fn delete_dir(&self, path: &str) -> Result<()>;

    fn create_dir(&self, path: &str, options: &WriteOptions) -> Result<()>;

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()>;

    fn visibility(&self, path: &str) -> Result<Visibility>;

    fn mime_type(&self, path: &str) -> Result<String>;

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>>;

    fn file_size(&self, path: &str) -> Result<u64>;

    /// List directory contents, recursively when `deep` / 列出目录内容
    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>>;

    fn move_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()>;

    /// Copy (default implementation: read then write) / 复制（默认：先读后写）
    fn copy_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let mut reader = self.open_reader(source)?;
        self.write_stream(destination, &mut reader, options)
    }

    /// Public URL capability, if the backend has one / 公开 URL 能力
    fn public_urls(&self) -> Option<&dyn PublicUrlGenerator> {
        None
    }

    /// Temporary URL capability, if the backend has one / 临时 URL 能力
    fn temporary_urls(&self) -> Option<&dyn TemporaryUrlGenerator> {
        None
    }

    /// URL rule family used when no generator is available / URL 规则族
    fn url_family(&self) -> Option<UrlFamily> {
        None
    }
}

pub mod blocking;
pub mod driver;
pub mod error;
pub mod file;
pub mod filesystem;
pub mod layers;
pub mod local_factory;
pub mod manager;
pub mod prefixer;
pub mod response;

pub use driver::{ChecksumAlgorithm, Contents, Driver};
pub use error::StorageError;
pub use file::{FileReference, LocalFile};
pub use filesystem::{Filesystem, FilesystemOptions};
pub use local_factory::LocalDriverFactory;
pub use manager::{DriverFactory, StorageManager};
pub use prefixer::PathPrefixer;
pub use response::{Disposition, ResponseSink, StreamedResponse};
