//! Uniform disk driver / 统一磁盘驱动
//!
//! Wraps a filesystem facade with the per-disk throw policy, URL resolution
//! and download responses. With `throw` off, failures are logged and the
//! operation returns its sentinel (`false`, `None`, empty list).
//! 在文件系统门面之上提供 throw 策略、URL 解析与下载响应。

use chrono::{DateTime, Utc};
use md5::Context as Md5Context;
use parking_lot::RwLock;
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::io::{self, Cursor, Read, Write};
use std::path::MAIN_SEPARATOR;
use std::sync::Arc;

use super::error::StorageError;
use super::file::{FileReference, LocalFile};
use super::filesystem::{Filesystem, FilesystemOptions};
use super::layers::{PrefixedAdapter, ReadOnlyAdapter};
use super::prefixer::PathPrefixer;
use super::response::{make_disposition, Disposition, StreamedResponse};
use super::{Entry, ReadStream, StorageAdapter, UrlFamily, Visibility, WriteOptions};
use crate::config::DiskConfig;
use crate::utils::{basename, concat_path_to_url, line_separator};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Custom public URL builder / 自定义公开 URL 构建器
pub type UrlBuilder = Arc<dyn Fn(&str, &DiskConfig) -> String + Send + Sync>;

/// Custom temporary URL builder / 自定义临时 URL 构建器
pub type TemporaryUrlBuilder =
    Arc<dyn Fn(&str, DateTime<Utc>, &DiskConfig) -> anyhow::Result<String> + Send + Sync>;

/// Content accepted by `put` / `put` 接受的内容
pub enum Contents<'a> {
    Bytes(Cow<'a, [u8]>),
    Stream(&'a mut dyn Read),
    File(&'a dyn FileReference),
}

impl<'a> Contents<'a> {
    pub fn file(file: &'a dyn FileReference) -> Self {
        Contents::File(file)
    }
}

impl<'a> From<&'a [u8]> for Contents<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Contents::Bytes(Cow::Borrowed(bytes))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Contents<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Contents::Bytes(Cow::Borrowed(bytes.as_slice()))
    }
}

impl From<Vec<u8>> for Contents<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Contents::Bytes(Cow::Owned(bytes))
    }
}

impl<'a> From<&'a str> for Contents<'a> {
    fn from(text: &'a str) -> Self {
        Contents::Bytes(Cow::Borrowed(text.as_bytes()))
    }
}

impl From<String> for Contents<'_> {
    fn from(text: String) -> Self {
        Contents::Bytes(Cow::Owned(text.into_bytes()))
    }
}

impl<'a> From<&'a LocalFile> for Contents<'a> {
    fn from(file: &'a LocalFile) -> Self {
        Contents::File(file)
    }
}

/// Checksum algorithm / 校验和算法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(anyhow::anyhow!("Unknown checksum algorithm: {}", other)),
        }
    }
}

enum Hasher {
    Md5(Md5Context),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5Context::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(hasher) => hasher.update(data),
            Hasher::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha1(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// A configured disk / 已配置的磁盘
pub struct Driver {
    filesystem: Arc<Filesystem>,
    /// Unwrapped backend, used for URL capabilities / 未包装的后端
    adapter: Arc<dyn StorageAdapter>,
    prefixer: PathPrefixer,
    config: DiskConfig,
    url_builder: RwLock<Option<UrlBuilder>>,
    temporary_url_builder: RwLock<Option<TemporaryUrlBuilder>>,
}

impl Driver {
    /// Build a driver around a backend adapter, applying the read-only and
    /// prefix layers from the disk configuration
    /// 根据磁盘配置套用只读层与前缀层
    pub fn new(adapter: Arc<dyn StorageAdapter>, config: DiskConfig) -> Self {
        let mut wrapped = adapter.clone();
        if config.read_only {
            wrapped = Arc::new(ReadOnlyAdapter::new(wrapped));
        }

        let mut prefixer = PathPrefixer::new(&config.root, MAIN_SEPARATOR);
        if let Some(prefix) = config.prefix.as_deref().filter(|p| !p.is_empty()) {
            wrapped = Arc::new(PrefixedAdapter::new(wrapped, prefix));
            prefixer = prefixer.chain(prefix);
        }

        let filesystem = Filesystem::new(wrapped, FilesystemOptions::from(&config));
        Self {
            filesystem: Arc::new(filesystem),
            adapter,
            prefixer,
            config,
            url_builder: RwLock::new(None),
            temporary_url_builder: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    pub fn filesystem(&self) -> &Arc<Filesystem> {
        &self.filesystem
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn throws(&self) -> bool {
        self.config.throw
    }

    /// Run an action under the throw policy / 在 throw 策略下执行操作
    fn attempt<T>(&self, fallback: T, action: impl FnOnce() -> Result<T>) -> Result<T> {
        match action() {
            Ok(value) => Ok(value),
            Err(e) if e.always_propagates() || self.throws() => Err(e),
            Err(e) => {
                let e = anyhow::Error::from(e);
                tracing::warn!("Storage operation failed on disk [{}]: {:#}", self.config.name, e);
                Ok(fallback)
            }
        }
    }

    /// Write with the disk default visibility, then apply the requested one
    /// 先按默认可见性写入，再设置调用方指定的可见性
    fn store(&self, path: &str, contents: Contents<'_>, options: &WriteOptions) -> Result<()> {
        let base = WriteOptions {
            visibility: None,
            ..options.clone()
        };
        match contents {
            Contents::Bytes(bytes) => self.filesystem.write(path, &bytes, &base)?,
            Contents::Stream(reader) => self.filesystem.write_stream(path, reader, &base)?,
            Contents::File(file) => {
                let mut reader = file.open().map_err(|e| StorageError::write(path, e.into()))?;
                self.filesystem.write_stream(path, &mut reader, &base)?
            }
        }
        if let Some(visibility) = options.visibility {
            self.filesystem.set_visibility(path, visibility)?;
        }
        Ok(())
    }

    // ---- existence / 存在性 ----

    pub fn exists(&self, path: &str) -> bool {
        self.filesystem.has(path).unwrap_or_else(|e| {
            tracing::debug!("Existence check failed on disk [{}]: {}", self.config.name, e);
            false
        })
    }

    pub fn missing(&self, path: &str) -> bool {
        !self.exists(path)
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.filesystem.file_exists(path).unwrap_or(false)
    }

    pub fn file_missing(&self, path: &str) -> bool {
        !self.file_exists(path)
    }

    pub fn directory_exists(&self, path: &str) -> bool {
        self.filesystem.directory_exists(path).unwrap_or(false)
    }

    pub fn directory_missing(&self, path: &str) -> bool {
        !self.directory_exists(path)
    }

    /// Physical location of a logical path / 逻辑路径对应的物理路径
    pub fn path(&self, path: &str) -> String {
        self.prefixer.prefix_path(path)
    }

    // ---- reads / 读取 ----

    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.attempt(None, || self.filesystem.read(path).map(Some))
    }

    /// Read and decode JSON; `None` when missing or malformed / 读取并解析 JSON
    pub fn json(&self, path: &str) -> Result<Option<Value>> {
        self.attempt(None, || {
            let bytes = self.filesystem.read(path)?;
            serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::read(path, e.into()))
        })
    }

    pub fn read_stream(&self, path: &str) -> Result<Option<ReadStream>> {
        self.attempt(None, || self.filesystem.read_stream(path).map(Some))
    }

    // ---- writes / 写入 ----

    pub fn put<'a>(
        &self,
        path: &str,
        contents: impl Into<Contents<'a>>,
        options: impl Into<WriteOptions>,
    ) -> Result<bool> {
        let options = options.into();
        self.attempt(false, || self.store(path, contents.into(), &options).map(|_| true))
    }

    pub fn write_stream(
        &self,
        path: &str,
        contents: &mut dyn Read,
        options: impl Into<WriteOptions>,
    ) -> Result<bool> {
        let options = options.into();
        self.attempt(false, || {
            self.store(path, Contents::Stream(contents), &options).map(|_| true)
        })
    }

    /// Store a file under a random name in `dir`, returns the stored path
    /// 以随机文件名保存到目录，返回保存路径
    pub fn put_file(
        &self,
        dir: &str,
        file: &dyn FileReference,
        options: impl Into<WriteOptions>,
    ) -> Result<Option<String>> {
        self.put_file_as(dir, file, &file.hash_name(), options)
    }

    pub fn put_file_as(
        &self,
        dir: &str,
        file: &dyn FileReference,
        name: &str,
        options: impl Into<WriteOptions>,
    ) -> Result<Option<String>> {
        let options = options.into();
        let path = format!("{}/{}", dir.trim_end_matches('/'), name)
            .trim_matches('/')
            .to_string();
        self.attempt(None, || {
            self.store(&path, Contents::File(file), &options)?;
            Ok(Some(path.clone()))
        })
    }

    /// Prepend data, separated from existing content / 在文件开头追加内容
    pub fn prepend(&self, path: &str, data: impl AsRef<[u8]>, separator: Option<&str>) -> Result<bool> {
        let data = data.as_ref();
        let separator = separator.unwrap_or(line_separator());
        self.attempt(false, || {
            let contents = match self.existing(path)? {
                Some(existing) => [data, separator.as_bytes(), &existing[..]].concat(),
                None => data.to_vec(),
            };
            self.filesystem.write(path, &contents, &WriteOptions::new())?;
            Ok(true)
        })
    }

    /// Append data, separated from existing content / 在文件末尾追加内容
    pub fn append(&self, path: &str, data: impl AsRef<[u8]>, separator: Option<&str>) -> Result<bool> {
        let data = data.as_ref();
        let separator = separator.unwrap_or(line_separator());
        self.attempt(false, || {
            let contents = match self.existing(path)? {
                Some(existing) => [&existing[..], separator.as_bytes(), data].concat(),
                None => data.to_vec(),
            };
            self.filesystem.write(path, &contents, &WriteOptions::new())?;
            Ok(true)
        })
    }

    fn existing(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if self.filesystem.file_exists(path)? {
            self.filesystem.read(path).map(Some)
        } else {
            Ok(None)
        }
    }

    // ---- visibility / 可见性 ----

    pub fn get_visibility(&self, path: &str) -> Result<Option<Visibility>> {
        self.attempt(None, || self.filesystem.visibility(path).map(Some))
    }

    pub fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<bool> {
        self.attempt(false, || self.filesystem.set_visibility(path, visibility).map(|_| true))
    }

    // ---- delete / copy / move ----

    /// Delete every path, continuing past failures / 删除所有路径，失败时继续
    pub fn delete<I>(&self, paths: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.attempt(false, || {
            let mut failed = Vec::new();
            let mut first_error = None;
            for path in paths {
                let path = path.as_ref();
                if let Err(e) = self.filesystem.delete(path) {
                    tracing::debug!("Failed to delete {}: {}", path, e);
                    failed.push(path.to_string());
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                None => Ok(true),
                Some(e) => Err(StorageError::DeleteFailure {
                    paths: failed,
                    source: match e {
                        StorageError::DeleteFailure { source, .. } => source,
                        other => other.into(),
                    },
                }),
            }
        })
    }

    pub fn copy(&self, from: &str, to: &str) -> Result<bool> {
        self.attempt(false, || {
            self.filesystem.copy(from, to, &WriteOptions::new()).map(|_| true)
        })
    }

    pub fn move_to(&self, from: &str, to: &str) -> Result<bool> {
        self.attempt(false, || {
            self.filesystem.move_to(from, to, &WriteOptions::new()).map(|_| true)
        })
    }

    // ---- metadata / 元数据 ----

    pub fn size(&self, path: &str) -> Result<Option<u64>> {
        self.attempt(None, || self.filesystem.file_size(path).map(Some))
    }

    pub fn mime_type(&self, path: &str) -> Result<Option<String>> {
        self.attempt(None, || self.filesystem.mime_type(path).map(Some))
    }

    pub fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>> {
        self.attempt(None, || self.filesystem.last_modified(path).map(Some))
    }

    /// Hex checksum of the content, hashed while streaming / 流式计算内容校验和
    pub fn checksum(&self, path: &str, algorithm: ChecksumAlgorithm) -> Result<Option<String>> {
        self.attempt(None, || {
            let failure = |e: io::Error| StorageError::metadata(path, "checksum", e.into());
            let mut reader = self.filesystem.read_stream(path)?;
            let mut hasher = Hasher::new(algorithm);
            let mut buf = [0u8; 8192];
            loop {
                let n = reader.read(&mut buf).map_err(failure)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(Some(hasher.finish()))
        })
    }

    // ---- listing / 列表 ----

    /// File paths, sorted / 文件路径（已排序）
    pub fn files(&self, directory: &str, recursive: bool) -> Result<Vec<String>> {
        self.attempt(Vec::new(), || {
            let mut files: Vec<Entry> = self
                .filesystem
                .list_contents(directory, recursive)?
                .into_iter()
                .filter(Entry::is_file)
                .collect();
            files.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(files.into_iter().map(|entry| entry.path).collect())
        })
    }

    pub fn all_files(&self, directory: &str) -> Result<Vec<String>> {
        self.files(directory, true)
    }

    /// Directory paths, in backend order / 目录路径（保持后端顺序）
    pub fn directories(&self, directory: &str, recursive: bool) -> Result<Vec<String>> {
        self.attempt(Vec::new(), || {
            Ok(self
                .filesystem
                .list_contents(directory, recursive)?
                .into_iter()
                .filter(|entry| entry.is_dir)
                .map(|entry| entry.path)
                .collect())
        })
    }

    pub fn all_directories(&self, directory: &str) -> Result<Vec<String>> {
        self.directories(directory, true)
    }

    pub fn make_directory(&self, path: &str) -> Result<bool> {
        self.attempt(false, || {
            self.filesystem.create_directory(path, &WriteOptions::new()).map(|_| true)
        })
    }

    pub fn delete_directory(&self, path: &str) -> Result<bool> {
        self.attempt(false, || self.filesystem.delete_directory(path).map(|_| true))
    }

    // ---- URLs ----

    /// Install a public URL builder used when nothing else resolves / 安装自定义 URL 构建器
    pub fn build_urls_using<F>(&self, builder: F)
    where
        F: Fn(&str, &DiskConfig) -> String + Send + Sync + 'static,
    {
        *self.url_builder.write() = Some(Arc::new(builder));
    }

    /// Install a temporary URL builder, takes precedence over the backend
    /// 安装临时 URL 构建器，优先于后端能力
    pub fn build_temporary_urls_using<F>(&self, builder: F)
    where
        F: Fn(&str, DateTime<Utc>, &DiskConfig) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        *self.temporary_url_builder.write() = Some(Arc::new(builder));
    }

    fn prefixed(&self, path: &str) -> String {
        match self.config.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => concat_path_to_url(prefix, path),
            _ => path.to_string(),
        }
    }

    /// Public URL for a path / 获取公开 URL
    ///
    /// Resolution order: backend generator, facade `public_url`, backend
    /// family rules, installed builder.
    pub fn url(&self, path: &str) -> Result<String> {
        let path = self.prefixed(path);

        if let Some(generator) = self.adapter.public_urls() {
            return Ok(generator.public_url(&path));
        }
        if let Some(url) = self.filesystem.public_url(&path) {
            return Ok(url);
        }
        match self.adapter.url_family() {
            Some(UrlFamily::RemoteTransfer) => return Ok(self.remote_transfer_url(&path)),
            Some(UrlFamily::Local) => return Ok(self.local_url(&path)),
            None => {}
        }
        if let Some(builder) = self.url_builder.read().clone() {
            return Ok(builder(&path, &self.config));
        }
        Err(StorageError::unsupported("This driver does not support retrieving URLs."))
    }

    fn remote_transfer_url(&self, path: &str) -> String {
        match self.config.url.as_deref() {
            Some(base) => concat_path_to_url(base, path),
            None => path.to_string(),
        }
    }

    fn local_url(&self, path: &str) -> String {
        if let Some(base) = self.config.url.as_deref() {
            return concat_path_to_url(base, path);
        }
        let url = format!("/storage/{}", path.trim_start_matches('/'));
        if url.contains("/storage/public/") {
            url.replacen("/public/", "/", 1)
        } else {
            url
        }
    }

    pub fn provides_temporary_urls(&self) -> bool {
        self.temporary_url_builder.read().is_some()
            || self.adapter.temporary_urls().is_some()
            || self.filesystem.options().temporary_url.is_some()
    }

    /// Expiring URL for a path / 获取临时 URL
    pub fn temporary_url(&self, path: &str, expires_at: DateTime<Utc>) -> Result<String> {
        let failure = |source| StorageError::UrlGenerationFailure {
            path: path.to_string(),
            source,
        };

        if let Some(builder) = self.temporary_url_builder.read().clone() {
            return builder(path, expires_at, &self.config).map_err(failure);
        }
        let prefixed = self.prefixed(path);
        if let Some(generator) = self.adapter.temporary_urls() {
            return generator.temporary_url(&prefixed, expires_at).map_err(failure);
        }
        if let Some(url) = self.filesystem.temporary_url(&prefixed, expires_at) {
            return Ok(url);
        }
        Err(StorageError::unsupported("This driver does not support creating temporary URLs."))
    }

    // ---- responses / 响应 ----

    /// Streamed response for a file / 生成文件的流式响应
    ///
    /// Caller headers win. Content-Type and Content-Length are omitted when the
    /// metadata lookup yields nothing.
    pub fn response(
        &self,
        path: &str,
        name: Option<&str>,
        headers: Vec<(String, String)>,
        disposition: Disposition,
    ) -> Result<StreamedResponse> {
        let mut headers = headers;
        let has = |headers: &[(String, String)], key: &str| {
            headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
        };

        if !has(&headers, "Content-Type") {
            if let Some(mime) = self.mime_type(path)? {
                headers.push(("Content-Type".to_string(), mime));
            }
        }
        if !has(&headers, "Content-Length") {
            if let Some(size) = self.size(path)? {
                headers.push(("Content-Length".to_string(), size.to_string()));
            }
        }
        if !has(&headers, "Content-Disposition") {
            let filename = name.unwrap_or_else(|| basename(path));
            headers.push((
                "Content-Disposition".to_string(),
                make_disposition(disposition, filename),
            ));
        }

        let filesystem = self.filesystem.clone();
        let path = path.to_string();
        let body = Box::new(move |out: &mut dyn Write| {
            let mut stream = filesystem
                .read_stream(&path)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            io::copy(&mut stream, out)
        });
        Ok(StreamedResponse::new(200, headers, body))
    }

    pub fn download(
        &self,
        path: &str,
        name: Option<&str>,
        headers: Vec<(String, String)>,
    ) -> Result<StreamedResponse> {
        self.response(path, name, headers, Disposition::Attachment)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.config.name)
            .field("kind", &self.config.kind)
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

/// Wrap a byte slice as a reader, handy for `write_stream` / 将字节切片包装为 reader
pub fn reader(bytes: &[u8]) -> Cursor<&[u8]> {
    Cursor::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryAdapter;
    use crate::storage::{PublicUrlGenerator, TemporaryUrlGenerator};
    use anyhow::anyhow;
    use chrono::TimeZone;
    use std::collections::HashSet;

    /// Memory adapter with failure injection and switchable URL capabilities
    struct StubAdapter {
        inner: MemoryAdapter,
        fail_delete: HashSet<String>,
        fail_writes: bool,
        fail_visibility: bool,
        fail_directories: bool,
        fail_transfers: bool,
        public_base: Option<String>,
        family: Option<UrlFamily>,
    }

    impl StubAdapter {
        fn new() -> Self {
            Self {
                inner: MemoryAdapter::new(),
                fail_delete: HashSet::new(),
                fail_writes: false,
                fail_visibility: false,
                fail_directories: false,
                fail_transfers: false,
                public_base: None,
                family: None,
            }
        }
    }

    impl PublicUrlGenerator for StubAdapter {
        fn public_url(&self, path: &str) -> String {
            format!("{}/{}", self.public_base.as_deref().unwrap_or(""), path)
        }
    }

    impl TemporaryUrlGenerator for StubAdapter {
        fn temporary_url(&self, path: &str, expires_at: DateTime<Utc>) -> anyhow::Result<String> {
            Ok(format!("signed://{}?e={}", path, expires_at.timestamp()))
        }
    }

    impl StorageAdapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }
        fn file_exists(&self, path: &str) -> anyhow::Result<bool> {
            self.inner.file_exists(path)
        }
        fn directory_exists(&self, path: &str) -> anyhow::Result<bool> {
            self.inner.directory_exists(path)
        }
        fn open_reader(&self, path: &str) -> anyhow::Result<ReadStream> {
            self.inner.open_reader(path)
        }
        fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> anyhow::Result<()> {
            if self.fail_writes {
                return Err(anyhow!("disk full"));
            }
            self.inner.write_stream(path, contents, options)
        }
        fn delete(&self, path: &str) -> anyhow::Result<()> {
            if self.fail_delete.contains(path) {
                return Err(anyhow!("permission denied"));
            }
            self.inner.delete(path)
        }
        fn delete_dir(&self, path: &str) -> anyhow::Result<()> {
            if self.fail_directories {
                return Err(anyhow!("directory busy"));
            }
            self.inner.delete_dir(path)
        }
        fn create_dir(&self, path: &str, options: &WriteOptions) -> anyhow::Result<()> {
            if self.fail_directories {
                return Err(anyhow!("read-only parent"));
            }
            self.inner.create_dir(path, options)
        }
        fn set_visibility(&self, path: &str, visibility: Visibility) -> anyhow::Result<()> {
            if self.fail_visibility {
                return Err(anyhow!("acl rejected"));
            }
            self.inner.set_visibility(path, visibility)
        }
        fn visibility(&self, path: &str) -> anyhow::Result<Visibility> {
            self.inner.visibility(path)
        }
        fn mime_type(&self, path: &str) -> anyhow::Result<String> {
            self.inner.mime_type(path)
        }
        fn last_modified(&self, path: &str) -> anyhow::Result<DateTime<Utc>> {
            self.inner.last_modified(path)
        }
        fn file_size(&self, path: &str) -> anyhow::Result<u64> {
            self.inner.file_size(path)
        }
        fn list(&self, path: &str, deep: bool) -> anyhow::Result<Vec<Entry>> {
            self.inner.list(path, deep)
        }
        fn move_item(&self, source: &str, destination: &str, options: &WriteOptions) -> anyhow::Result<()> {
            if self.fail_transfers {
                return Err(anyhow!("cross-device link"));
            }
            self.inner.move_item(source, destination, options)
        }
        fn copy_item(&self, source: &str, destination: &str, options: &WriteOptions) -> anyhow::Result<()> {
            if self.fail_transfers {
                return Err(anyhow!("quota exceeded"));
            }
            self.inner.copy_item(source, destination, options)
        }
        fn public_urls(&self) -> Option<&dyn PublicUrlGenerator> {
            self.public_base.as_ref().map(|_| self as &dyn PublicUrlGenerator)
        }
        fn temporary_urls(&self) -> Option<&dyn TemporaryUrlGenerator> {
            self.public_base.as_ref().map(|_| self as &dyn TemporaryUrlGenerator)
        }
        fn url_family(&self) -> Option<UrlFamily> {
            self.family
        }
    }

    fn memory_driver(config: DiskConfig) -> Driver {
        Driver::new(Arc::new(MemoryAdapter::new()), config.named("test"))
    }

    fn stub_driver(stub: StubAdapter, config: DiskConfig) -> Driver {
        Driver::new(Arc::new(stub), config.named("test"))
    }

    #[test]
    fn test_put_and_get_every_content_kind() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        assert!(driver.put("a.txt", "text", WriteOptions::new()).unwrap());
        assert!(driver.put("b.bin", vec![1u8, 2, 3], WriteOptions::new()).unwrap());

        let mut source = Cursor::new(b"streamed".to_vec());
        assert!(driver.put("c.txt", Contents::Stream(&mut source), WriteOptions::new()).unwrap());

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"from disk").unwrap();
        let local = LocalFile::new(tmp.path());
        assert!(driver.put("d.txt", &local, WriteOptions::new()).unwrap());

        assert_eq!(driver.get("a.txt").unwrap().unwrap(), b"text");
        assert_eq!(driver.get("b.bin").unwrap().unwrap(), vec![1, 2, 3]);
        assert_eq!(driver.get("c.txt").unwrap().unwrap(), b"streamed");
        assert_eq!(driver.get("d.txt").unwrap().unwrap(), b"from disk");
        assert_eq!(driver.get("missing.txt").unwrap(), None);
    }

    #[test]
    fn test_put_file_uses_generated_name() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(b"png").unwrap();
        let local = LocalFile::new(tmp.path());

        let stored = driver.put_file("/avatars/", &local, WriteOptions::new()).unwrap().unwrap();
        assert!(stored.starts_with("avatars/"));
        assert!(stored.ends_with(".png"));
        assert_eq!(stored.len(), "avatars/".len() + 44);

        let named = driver.put_file_as("", &local, "me.png", Visibility::Private).unwrap();
        assert_eq!(named.as_deref(), Some("me.png"));
        assert_eq!(driver.get_visibility("me.png").unwrap(), Some(Visibility::Private));
    }

    #[test]
    fn test_write_failure_respects_throw_policy() {
        let mut stub = StubAdapter::new();
        stub.fail_writes = true;
        let quiet = stub_driver(stub, DiskConfig::new("stub", ""));
        assert!(!quiet.put("a.txt", "x", WriteOptions::new()).unwrap());

        let mut stub = StubAdapter::new();
        stub.fail_writes = true;
        let loud = stub_driver(stub, DiskConfig::new("stub", "").throw(true));
        assert!(matches!(
            loud.put("a.txt", "x", WriteOptions::new()),
            Err(StorageError::WriteFailure { .. })
        ));
    }

    #[test]
    fn test_visibility_failure_after_write() {
        let mut stub = StubAdapter::new();
        stub.fail_visibility = true;
        let quiet = stub_driver(stub, DiskConfig::new("stub", ""));
        assert!(!quiet.put("a.txt", "x", Visibility::Public).unwrap());
        // The content write went through before the visibility step failed
        assert_eq!(quiet.get("a.txt").unwrap().unwrap(), b"x");
        assert!(quiet.put("b.txt", "x", WriteOptions::new()).unwrap());

        let mut stub = StubAdapter::new();
        stub.fail_visibility = true;
        let loud = stub_driver(stub, DiskConfig::new("stub", "").throw(true));
        assert!(matches!(
            loud.write_stream("a.txt", &mut reader(b"x"), Visibility::Public),
            Err(StorageError::VisibilitySetFailure { path, .. }) if path == "a.txt"
        ));
        assert!(loud.file_exists("a.txt"));
        assert!(matches!(
            loud.set_visibility("a.txt", Visibility::Private),
            Err(StorageError::VisibilitySetFailure { .. })
        ));
    }

    #[test]
    fn test_transfer_failures_respect_throw_policy() {
        let mut stub = StubAdapter::new();
        stub.fail_transfers = true;
        let quiet = stub_driver(stub, DiskConfig::new("stub", ""));
        quiet.put("a.txt", "x", WriteOptions::new()).unwrap();
        assert!(!quiet.copy("a.txt", "b.txt").unwrap());
        assert!(!quiet.move_to("a.txt", "b.txt").unwrap());
        assert!(quiet.file_exists("a.txt"));

        let mut stub = StubAdapter::new();
        stub.fail_transfers = true;
        let loud = stub_driver(stub, DiskConfig::new("stub", "").throw(true));
        loud.put("a.txt", "x", WriteOptions::new()).unwrap();
        assert!(matches!(
            loud.copy("a.txt", "b.txt"),
            Err(StorageError::CopyFailure { from, to, .. }) if from == "a.txt" && to == "b.txt"
        ));
        assert!(matches!(
            loud.move_to("a.txt", "c.txt"),
            Err(StorageError::MoveFailure { from, to, .. }) if from == "a.txt" && to == "c.txt"
        ));
    }

    #[test]
    fn test_directory_failures_respect_throw_policy() {
        let mut stub = StubAdapter::new();
        stub.fail_directories = true;
        let quiet = stub_driver(stub, DiskConfig::new("stub", ""));
        assert!(!quiet.make_directory("docs").unwrap());
        assert!(!quiet.delete_directory("docs").unwrap());

        let mut stub = StubAdapter::new();
        stub.fail_directories = true;
        let loud = stub_driver(stub, DiskConfig::new("stub", "").throw(true));
        assert!(matches!(
            loud.make_directory("docs"),
            Err(StorageError::DirectoryCreateFailure { path, .. }) if path == "docs"
        ));
        assert!(matches!(
            loud.delete_directory("docs"),
            Err(StorageError::DirectoryDeleteFailure { path, .. }) if path == "docs"
        ));
    }

    #[test]
    fn test_whitespace_segments_stay_distinct() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        driver.put("a/ /b.txt", "one", WriteOptions::new()).unwrap();
        driver.put("a/b.txt", "two", WriteOptions::new()).unwrap();
        driver.put("x/.. /y.txt", "three", WriteOptions::new()).unwrap();

        assert_eq!(driver.get("a/ /b.txt").unwrap().unwrap(), b"one");
        assert_eq!(driver.get("a/b.txt").unwrap().unwrap(), b"two");
        assert!(driver.file_missing("y.txt"));
        assert_eq!(
            driver.all_files("").unwrap(),
            vec!["a/ /b.txt", "a/b.txt", "x/.. /y.txt"]
        );
    }

    #[test]
    fn test_delete_continues_past_failures() {
        let mut stub = StubAdapter::new();
        stub.fail_delete.insert("b.txt".into());
        let driver = stub_driver(stub, DiskConfig::new("stub", ""));
        for path in ["a.txt", "b.txt", "c.txt"] {
            driver.put(path, "x", WriteOptions::new()).unwrap();
        }

        assert!(!driver.delete(["a.txt", "b.txt", "c.txt"]).unwrap());
        assert!(driver.missing("a.txt"));
        assert!(driver.exists("b.txt"));
        assert!(driver.missing("c.txt"));

        let mut stub = StubAdapter::new();
        stub.fail_delete.insert("b.txt".into());
        let driver = stub_driver(stub, DiskConfig::new("stub", "").throw(true));
        match driver.delete(vec!["b.txt".to_string(), "a.txt".to_string()]) {
            Err(StorageError::DeleteFailure { paths, .. }) => assert_eq!(paths, vec!["b.txt"]),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_append_and_prepend() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        assert!(driver.append("log.txt", "first", None).unwrap());
        assert!(driver.append("log.txt", "second", None).unwrap());
        assert!(driver.prepend("log.txt", "zero", Some(" | ")).unwrap());

        let expected = format!("zero | first{}second", line_separator());
        assert_eq!(driver.get("log.txt").unwrap().unwrap(), expected.as_bytes());
    }

    #[test]
    fn test_files_sorted_directories_filtered() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        for path in ["docs/z.txt", "docs/a.txt", "docs/m/deep.txt", "top.txt"] {
            driver.put(path, "x", WriteOptions::new()).unwrap();
        }
        driver.make_directory("docs/empty").unwrap();

        assert_eq!(driver.files("docs", false).unwrap(), vec!["docs/a.txt", "docs/z.txt"]);
        assert_eq!(
            driver.all_files("").unwrap(),
            vec!["docs/a.txt", "docs/m/deep.txt", "docs/z.txt", "top.txt"]
        );

        let mut dirs = driver.directories("docs", false).unwrap();
        dirs.sort();
        assert_eq!(dirs, vec!["docs/empty", "docs/m"]);
        assert!(driver.files("nowhere", false).unwrap().is_empty());
    }

    #[test]
    fn test_metadata_sentinels() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        driver.put("data.json", r#"{"ok":true}"#, WriteOptions::new()).unwrap();
        driver.put("broken.json", "{", WriteOptions::new()).unwrap();

        assert_eq!(driver.size("data.json").unwrap(), Some(11));
        assert_eq!(driver.mime_type("data.json").unwrap().as_deref(), Some("application/json"));
        assert!(driver.last_modified("data.json").unwrap().is_some());
        assert_eq!(driver.json("data.json").unwrap(), Some(serde_json::json!({"ok": true})));
        assert_eq!(driver.json("broken.json").unwrap(), None);
        assert_eq!(driver.size("missing").unwrap(), None);
        assert_eq!(driver.mime_type("missing").unwrap(), None);
    }

    #[test]
    fn test_checksum() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        driver.put("hello.txt", "hello", WriteOptions::new()).unwrap();
        assert_eq!(
            driver.checksum("hello.txt", ChecksumAlgorithm::Md5).unwrap().as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert_eq!(
            driver.checksum("hello.txt", ChecksumAlgorithm::Sha256).unwrap().as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_eq!(driver.checksum("missing", ChecksumAlgorithm::Sha1).unwrap(), None);
    }

    #[test]
    fn test_copy_move_and_directories() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        driver.put("a.txt", "a", WriteOptions::new()).unwrap();
        assert!(driver.copy("a.txt", "b.txt").unwrap());
        assert!(driver.move_to("b.txt", "dir/c.txt").unwrap());
        assert!(driver.file_exists("a.txt"));
        assert!(driver.file_missing("b.txt"));
        assert!(driver.directory_exists("dir"));
        assert!(!driver.copy("nope.txt", "x.txt").unwrap());

        assert!(driver.delete_directory("dir").unwrap());
        assert!(driver.directory_missing("dir"));
    }

    #[test]
    fn test_read_only_disk_rejects_writes() {
        let driver = memory_driver(DiskConfig::new("memory", "").read_only(true).throw(true));
        assert!(matches!(
            driver.put("a.txt", "x", WriteOptions::new()),
            Err(StorageError::WriteFailure { .. })
        ));
        assert!(matches!(driver.delete(["a.txt"]), Err(StorageError::DeleteFailure { .. })));
        assert_eq!(driver.get("a.txt").ok(), None);
    }

    #[test]
    fn test_prefix_scopes_paths() {
        let adapter = Arc::new(MemoryAdapter::new());
        let scoped = Driver::new(adapter.clone(), DiskConfig::new("memory", "/srv").prefix("tenant"));
        scoped.put("a.txt", "scoped", WriteOptions::new()).unwrap();

        assert!(adapter.file_exists("tenant/a.txt").unwrap());
        assert_eq!(scoped.files("", false).unwrap(), vec!["a.txt"]);
        let sep = MAIN_SEPARATOR;
        assert_eq!(scoped.path("a.txt"), format!("/srv{}tenant{}a.txt", sep, sep));
    }

    #[test]
    fn test_url_resolution_order() {
        let mut stub = StubAdapter::new();
        stub.public_base = Some("https://bucket.test".into());
        stub.family = Some(UrlFamily::Local);
        let driver = stub_driver(stub, DiskConfig::new("stub", "").url("https://ignored.test"));
        assert_eq!(driver.url("a.png").unwrap(), "https://bucket.test/a.png");

        let mut stub = StubAdapter::new();
        stub.family = Some(UrlFamily::RemoteTransfer);
        let mut config = DiskConfig::new("stub", "");
        config.public_url = Some("https://facade.test".into());
        assert_eq!(stub_driver(stub, config).url("a.png").unwrap(), "https://facade.test/a.png");
    }

    #[test]
    fn test_family_urls() {
        let mut stub = StubAdapter::new();
        stub.family = Some(UrlFamily::RemoteTransfer);
        assert_eq!(stub_driver(stub, DiskConfig::new("ftp", "")).url("a/b.txt").unwrap(), "a/b.txt");

        let mut stub = StubAdapter::new();
        stub.family = Some(UrlFamily::RemoteTransfer);
        let driver = stub_driver(stub, DiskConfig::new("ftp", "").url("ftp://files.test/"));
        assert_eq!(driver.url("a/b.txt").unwrap(), "ftp://files.test/a/b.txt");

        let mut stub = StubAdapter::new();
        stub.family = Some(UrlFamily::Local);
        let driver = stub_driver(stub, DiskConfig::new("local", ""));
        assert_eq!(driver.url("a.png").unwrap(), "/storage/a.png");
        assert_eq!(driver.url("public/a.png").unwrap(), "/storage/a.png");

        let mut stub = StubAdapter::new();
        stub.family = Some(UrlFamily::Local);
        let driver = stub_driver(stub, DiskConfig::new("local", "").url("/files").prefix("users"));
        assert_eq!(driver.url("a.png").unwrap(), "/files/users/a.png");
    }

    #[test]
    fn test_url_builder_and_unsupported() {
        let driver = stub_driver(StubAdapter::new(), DiskConfig::new("stub", "").throw(false));
        assert!(matches!(driver.url("a.png"), Err(StorageError::UnsupportedOperation(_))));

        driver.build_urls_using(|path, config| format!("custom://{}/{}", config.name, path));
        assert_eq!(driver.url("a.png").unwrap(), "custom://test/a.png");
    }

    #[test]
    fn test_temporary_urls() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let plain = stub_driver(StubAdapter::new(), DiskConfig::new("stub", ""));
        assert!(!plain.provides_temporary_urls());
        assert!(matches!(
            plain.temporary_url("a.txt", at),
            Err(StorageError::UnsupportedOperation(_))
        ));

        let mut stub = StubAdapter::new();
        stub.public_base = Some("https://bucket.test".into());
        let signed = stub_driver(stub, DiskConfig::new("stub", ""));
        assert!(signed.provides_temporary_urls());
        assert_eq!(
            signed.temporary_url("a.txt", at).unwrap(),
            format!("signed://a.txt?e={}", at.timestamp())
        );

        signed.build_temporary_urls_using(|_, _, _| Err(anyhow!("no signer")));
        assert!(matches!(
            signed.temporary_url("a.txt", at),
            Err(StorageError::UrlGenerationFailure { .. })
        ));
    }

    #[test]
    fn test_download_response() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        driver.put("reports/q1.csv", "a,b\n1,2\n", WriteOptions::new()).unwrap();

        let response = driver
            .download("reports/q1.csv", Some("résumé.csv"), vec![("X-Trace".into(), "1".into())])
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("content-type"), Some("text/csv"));
        assert_eq!(response.header("content-length"), Some("8"));
        assert_eq!(
            response.header("content-disposition"),
            Some("attachment; filename=\"resume.csv\"; filename*=utf-8''r%C3%A9sum%C3%A9.csv")
        );
        assert_eq!(response.header("x-trace"), Some("1"));

        let mut body = Vec::new();
        assert_eq!(response.write_body(&mut body).unwrap(), 8);
        assert_eq!(body, b"a,b\n1,2\n");
    }

    #[test]
    fn test_response_headers() {
        let driver = memory_driver(DiskConfig::new("memory", ""));
        driver.put("blob", "xyz", WriteOptions::new()).unwrap();

        let response = driver
            .response("blob", None, vec![("content-type".into(), "text/x-custom".into())], Disposition::Inline)
            .unwrap();
        assert_eq!(response.header("Content-Type"), Some("text/x-custom"));
        assert_eq!(response.header("Content-Disposition"), Some("inline; filename=\"blob\""));

        let unknown = driver.response("blob", None, Vec::new(), Disposition::Inline).unwrap();
        assert_eq!(unknown.header("Content-Type"), None);
        assert_eq!(unknown.header("Content-Length"), Some("3"));
    }

    #[test]
    fn test_explicit_visibility_is_applied() {
        let driver = memory_driver(DiskConfig::new("memory", "").visibility(Visibility::Private));
        driver.put("default.txt", "x", WriteOptions::new()).unwrap();
        driver.write_stream("open.txt", &mut reader(b"x"), Visibility::Public).unwrap();
        assert_eq!(driver.get_visibility("default.txt").unwrap(), Some(Visibility::Private));
        assert_eq!(driver.get_visibility("open.txt").unwrap(), Some(Visibility::Public));

        assert!(driver.set_visibility("default.txt", Visibility::Public).unwrap());
        assert!(!driver.set_visibility("missing.txt", Visibility::Public).unwrap());
    }
}
