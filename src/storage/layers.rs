//! Adapter wrappers applied when a driver is built / 构建驱动时套用的适配器包装层

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::Arc;

use super::prefixer::PathPrefixer;
use super::{
    Entry, PublicUrlGenerator, ReadStream, StorageAdapter, TemporaryUrlGenerator, UrlFamily,
    Visibility, WriteOptions,
};

/// Rejects every mutating call / 拒绝所有写操作
pub struct ReadOnlyAdapter {
    inner: Arc<dyn StorageAdapter>,
}

impl ReadOnlyAdapter {
    pub fn new(inner: Arc<dyn StorageAdapter>) -> Self {
        Self { inner }
    }

    fn denied(&self, action: &str, path: &str) -> anyhow::Error {
        anyhow!("{} is not allowed on a read-only filesystem: {}", action, path)
    }
}

impl StorageAdapter for ReadOnlyAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        self.inner.file_exists(path)
    }

    fn directory_exists(&self, path: &str) -> Result<bool> {
        self.inner.directory_exists(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn open_reader(&self, path: &str) -> Result<ReadStream> {
        self.inner.open_reader(path)
    }

    fn write(&self, path: &str, _contents: &[u8], _options: &WriteOptions) -> Result<()> {
        Err(self.denied("Writing", path))
    }

    fn write_stream(&self, path: &str, _contents: &mut dyn Read, _options: &WriteOptions) -> Result<()> {
        Err(self.denied("Writing", path))
    }

    fn delete(&self, path: &str) -> Result<()> {
        Err(self.denied("Deleting", path))
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        Err(self.denied("Deleting directory", path))
    }

    fn create_dir(&self, path: &str, _options: &WriteOptions) -> Result<()> {
        Err(self.denied("Creating directory", path))
    }

    fn set_visibility(&self, path: &str, _visibility: Visibility) -> Result<()> {
        Err(self.denied("Setting visibility", path))
    }

    fn visibility(&self, path: &str) -> Result<Visibility> {
        self.inner.visibility(path)
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        self.inner.mime_type(path)
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        self.inner.last_modified(path)
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.inner.file_size(path)
    }

    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        self.inner.list(path, deep)
    }

    fn move_item(&self, source: &str, _destination: &str, _options: &WriteOptions) -> Result<()> {
        Err(self.denied("Moving", source))
    }

    fn copy_item(&self, _source: &str, destination: &str, _options: &WriteOptions) -> Result<()> {
        Err(self.denied("Copying", destination))
    }

    fn public_urls(&self) -> Option<&dyn PublicUrlGenerator> {
        self.inner.public_urls()
    }

    fn temporary_urls(&self) -> Option<&dyn TemporaryUrlGenerator> {
        self.inner.temporary_urls()
    }

    fn url_family(&self) -> Option<UrlFamily> {
        self.inner.url_family()
    }
}

/// Scopes every path below a sub-prefix / 将所有路径限定在子前缀下
pub struct PrefixedAdapter {
    inner: Arc<dyn StorageAdapter>,
    prefixer: PathPrefixer,
}

impl PrefixedAdapter {
    pub fn new(inner: Arc<dyn StorageAdapter>, prefix: &str) -> Self {
        Self {
            inner,
            prefixer: PathPrefixer::new(prefix.trim_start_matches('/'), '/'),
        }
    }

    fn p(&self, path: &str) -> String {
        self.prefixer.prefix_path(path)
    }

    fn dir(&self, path: &str) -> String {
        self.prefixer.prefix_directory_path(path).trim_end_matches('/').to_string()
    }
}

impl StorageAdapter for PrefixedAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        self.inner.file_exists(&self.p(path))
    }

    fn directory_exists(&self, path: &str) -> Result<bool> {
        self.inner.directory_exists(&self.dir(path))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(&self.p(path))
    }

    fn open_reader(&self, path: &str) -> Result<ReadStream> {
        self.inner.open_reader(&self.p(path))
    }

    fn write(&self, path: &str, contents: &[u8], options: &WriteOptions) -> Result<()> {
        self.inner.write(&self.p(path), contents, options)
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> Result<()> {
        self.inner.write_stream(&self.p(path), contents, options)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(&self.p(path))
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        self.inner.delete_dir(&self.dir(path))
    }

    fn create_dir(&self, path: &str, options: &WriteOptions) -> Result<()> {
        self.inner.create_dir(&self.dir(path), options)
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        self.inner.set_visibility(&self.p(path), visibility)
    }

    fn visibility(&self, path: &str) -> Result<Visibility> {
        self.inner.visibility(&self.p(path))
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        self.inner.mime_type(&self.p(path))
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        self.inner.last_modified(&self.p(path))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.inner.file_size(&self.p(path))
    }

    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        let entries = self.inner.list(&self.dir(path), deep)?;
        Ok(entries
            .into_iter()
            .map(|mut entry| {
                entry.path = if entry.is_dir {
                    self.prefixer.strip_directory_prefix(&entry.path)
                } else {
                    self.prefixer.strip_prefix(&entry.path)
                };
                entry
            })
            .collect())
    }

    fn move_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        self.inner.move_item(&self.p(source), &self.p(destination), options)
    }

    fn copy_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        self.inner.copy_item(&self.p(source), &self.p(destination), options)
    }

    fn public_urls(&self) -> Option<&dyn PublicUrlGenerator> {
        self.inner.public_urls()
    }

    fn temporary_urls(&self) -> Option<&dyn TemporaryUrlGenerator> {
        self.inner.temporary_urls()
    }

    fn url_family(&self) -> Option<UrlFamily> {
        self.inner.url_family()
    }
}
