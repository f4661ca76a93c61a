//! Filesystem facade over one (wrapped) adapter / 单个适配器之上的文件系统门面
//!
//! Normalizes paths, fills in configured defaults and turns adapter failures
//! into typed errors. It always raises; the throw policy lives in `Driver`.
//! 规范化路径、填充默认配置，并把适配器错误转换为类型化错误。

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::Arc;

use super::error::StorageError;
use super::{Entry, ReadStream, StorageAdapter, Visibility, WriteOptions};
use crate::config::DiskConfig;
use crate::utils::{concat_path_to_url, normalize_path};

/// Facade options taken from the disk configuration / 门面配置
#[derive(Debug, Clone, Default)]
pub struct FilesystemOptions {
    pub visibility: Option<Visibility>,
    pub directory_visibility: Option<Visibility>,
    pub disable_asserts: bool,
    pub public_url: Option<String>,
    pub temporary_url: Option<String>,
}

impl From<&DiskConfig> for FilesystemOptions {
    fn from(config: &DiskConfig) -> Self {
        Self {
            visibility: config.visibility,
            directory_visibility: config.directory_visibility,
            disable_asserts: config.disable_asserts,
            public_url: config.public_url.clone(),
            temporary_url: config.temporary_url.clone(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub struct Filesystem {
    adapter: Arc<dyn StorageAdapter>,
    options: FilesystemOptions,
}

impl Filesystem {
    pub fn new(adapter: Arc<dyn StorageAdapter>, options: FilesystemOptions) -> Self {
        Self { adapter, options }
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn options(&self) -> &FilesystemOptions {
        &self.options
    }

    fn write_options(&self, options: &WriteOptions) -> WriteOptions {
        WriteOptions {
            visibility: options.visibility.or(self.options.visibility),
            directory_visibility: options
                .directory_visibility
                .or(self.options.directory_visibility),
            mime_type: options.mime_type.clone(),
        }
    }

    pub fn file_exists(&self, path: &str) -> Result<bool> {
        let location = normalize_path(path).map_err(|e| StorageError::metadata(path, "existence", e))?;
        self.adapter
            .file_exists(&location)
            .map_err(|e| StorageError::metadata(path, "existence", e))
    }

    pub fn directory_exists(&self, path: &str) -> Result<bool> {
        let location = normalize_path(path).map_err(|e| StorageError::metadata(path, "existence", e))?;
        self.adapter
            .directory_exists(&location)
            .map_err(|e| StorageError::metadata(path, "existence", e))
    }

    pub fn has(&self, path: &str) -> Result<bool> {
        Ok(self.file_exists(path)? || self.directory_exists(path)?)
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let location = normalize_path(path).map_err(|e| StorageError::read(path, e))?;
        self.adapter.read(&location).map_err(|e| StorageError::read(path, e))
    }

    pub fn read_stream(&self, path: &str) -> Result<ReadStream> {
        let location = normalize_path(path).map_err(|e| StorageError::read(path, e))?;
        self.adapter
            .open_reader(&location)
            .map_err(|e| StorageError::read(path, e))
    }

    pub fn write(&self, path: &str, contents: &[u8], options: &WriteOptions) -> Result<()> {
        let location = normalize_path(path).map_err(|e| StorageError::write(path, e))?;
        self.adapter
            .write(&location, contents, &self.write_options(options))
            .map_err(|e| StorageError::write(path, e))
    }

    pub fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> Result<()> {
        let location = normalize_path(path).map_err(|e| StorageError::write(path, e))?;
        self.adapter
            .write_stream(&location, contents, &self.write_options(options))
            .map_err(|e| StorageError::write(path, e))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        let delete_failure = |e| StorageError::DeleteFailure {
            paths: vec![path.to_string()],
            source: e,
        };
        let location = normalize_path(path).map_err(delete_failure)?;
        self.adapter.delete(&location).map_err(delete_failure)
    }

    pub fn delete_directory(&self, path: &str) -> Result<()> {
        let failure = |e| StorageError::DirectoryDeleteFailure {
            path: path.to_string(),
            source: e,
        };
        let location = normalize_path(path).map_err(failure)?;
        self.adapter.delete_dir(&location).map_err(failure)
    }

    pub fn create_directory(&self, path: &str, options: &WriteOptions) -> Result<()> {
        let failure = |e| StorageError::DirectoryCreateFailure {
            path: path.to_string(),
            source: e,
        };
        let location = normalize_path(path).map_err(failure)?;
        let options = WriteOptions {
            visibility: options
                .directory_visibility
                .or(options.visibility)
                .or(self.options.directory_visibility),
            ..self.write_options(options)
        };
        self.adapter.create_dir(&location, &options).map_err(failure)
    }

    pub fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let location = normalize_path(path).map_err(|e| StorageError::visibility(path, e))?;
        self.adapter
            .set_visibility(&location, visibility)
            .map_err(|e| StorageError::visibility(path, e))
    }

    pub fn visibility(&self, path: &str) -> Result<Visibility> {
        let location = normalize_path(path).map_err(|e| StorageError::metadata(path, "visibility", e))?;
        self.adapter
            .visibility(&location)
            .map_err(|e| StorageError::metadata(path, "visibility", e))
    }

    pub fn mime_type(&self, path: &str) -> Result<String> {
        let location = normalize_path(path).map_err(|e| StorageError::metadata(path, "mime_type", e))?;
        self.adapter
            .mime_type(&location)
            .map_err(|e| StorageError::metadata(path, "mime_type", e))
    }

    pub fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let location = normalize_path(path).map_err(|e| StorageError::metadata(path, "last_modified", e))?;
        self.adapter
            .last_modified(&location)
            .map_err(|e| StorageError::metadata(path, "last_modified", e))
    }

    pub fn file_size(&self, path: &str) -> Result<u64> {
        let location = normalize_path(path).map_err(|e| StorageError::metadata(path, "file_size", e))?;
        self.adapter
            .file_size(&location)
            .map_err(|e| StorageError::metadata(path, "file_size", e))
    }

    pub fn list_contents(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        let location = normalize_path(path).map_err(|e| StorageError::read(path, e))?;
        self.adapter
            .list(&location, deep)
            .map_err(|e| StorageError::read(path, e))
    }

    pub fn copy(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let failure = |e| StorageError::CopyFailure {
            from: source.to_string(),
            to: destination.to_string(),
            source: e,
        };
        let from = normalize_path(source).map_err(failure)?;
        let to = normalize_path(destination).map_err(failure)?;
        self.assert_present(&from).map_err(failure)?;
        self.adapter
            .copy_item(&from, &to, &self.write_options(options))
            .map_err(failure)
    }

    pub fn move_to(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let failure = |e| StorageError::MoveFailure {
            from: source.to_string(),
            to: destination.to_string(),
            source: e,
        };
        let from = normalize_path(source).map_err(failure)?;
        let to = normalize_path(destination).map_err(failure)?;
        if from == to {
            return Ok(());
        }
        self.assert_present(&from).map_err(failure)?;
        self.adapter
            .move_item(&from, &to, &self.write_options(options))
            .map_err(failure)
    }

    fn assert_present(&self, location: &str) -> anyhow::Result<()> {
        if self.options.disable_asserts || self.adapter.file_exists(location)? {
            Ok(())
        } else {
            Err(anyhow!("File not found at path: {}", location))
        }
    }

    /// Facade-level public URL, only when `public_url` is configured / 门面级公开 URL
    pub fn public_url(&self, path: &str) -> Option<String> {
        self.options
            .public_url
            .as_deref()
            .map(|base| concat_path_to_url(base, path))
    }

    /// Facade-level temporary URL from the configured template / 根据模板生成临时 URL
    pub fn temporary_url(&self, path: &str, expires_at: DateTime<Utc>) -> Option<String> {
        let template = self.options.temporary_url.as_deref()?;
        let expires = expires_at.timestamp().to_string();
        let encoded = urlencoding::encode(path).replace("%2F", "/");
        if template.contains("{path}") {
            Some(template.replace("{path}", &encoded).replace("{expires}", &expires))
        } else {
            let url = concat_path_to_url(template, &encoded);
            let sep = if url.contains('?') { '&' } else { '?' };
            Some(format!("{}{}expires={}", url, sep, expires))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryAdapter;
    use chrono::TimeZone;

    fn filesystem(options: FilesystemOptions) -> Filesystem {
        Filesystem::new(Arc::new(MemoryAdapter::new()), options)
    }

    #[test]
    fn test_paths_are_normalized() {
        let fs = filesystem(FilesystemOptions::default());
        fs.write("/docs//a.txt", b"hello", &WriteOptions::new()).unwrap();
        assert_eq!(fs.read("docs/./a.txt").unwrap(), b"hello");
        assert!(fs.file_exists("\\docs\\a.txt").unwrap());
    }

    #[test]
    fn test_traversal_is_a_typed_failure() {
        let fs = filesystem(FilesystemOptions::default());
        assert!(matches!(fs.read("../etc/passwd"), Err(StorageError::ReadFailure { .. })));
        assert!(matches!(
            fs.write("../x", b"", &WriteOptions::new()),
            Err(StorageError::WriteFailure { .. })
        ));
    }

    #[test]
    fn test_default_visibility_applies() {
        let fs = filesystem(FilesystemOptions {
            visibility: Some(Visibility::Private),
            ..Default::default()
        });
        fs.write("secret.txt", b"x", &WriteOptions::new()).unwrap();
        fs.write("open.txt", b"x", &Visibility::Public.into()).unwrap();
        assert_eq!(fs.visibility("secret.txt").unwrap(), Visibility::Private);
        assert_eq!(fs.visibility("open.txt").unwrap(), Visibility::Public);
    }

    #[test]
    fn test_copy_asserts_source() {
        let fs = filesystem(FilesystemOptions::default());
        assert!(matches!(
            fs.copy("nope.txt", "dest.txt", &WriteOptions::new()),
            Err(StorageError::CopyFailure { .. })
        ));
        fs.write("a.txt", b"a", &WriteOptions::new()).unwrap();
        fs.move_to("a.txt", "a.txt", &WriteOptions::new()).unwrap();
        fs.move_to("a.txt", "b.txt", &WriteOptions::new()).unwrap();
        assert!(!fs.file_exists("a.txt").unwrap());
        assert_eq!(fs.read("b.txt").unwrap(), b"a");
    }

    #[test]
    fn test_temporary_url_template() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let fs = filesystem(FilesystemOptions {
            temporary_url: Some("https://cdn.test/{path}?expires={expires}".into()),
            ..Default::default()
        });
        assert_eq!(
            fs.temporary_url("a b/c.txt", at).unwrap(),
            format!("https://cdn.test/a%20b/c.txt?expires={}", at.timestamp())
        );

        let plain = filesystem(FilesystemOptions {
            temporary_url: Some("https://cdn.test/files".into()),
            ..Default::default()
        });
        assert_eq!(
            plain.temporary_url("c.txt", at).unwrap(),
            format!("https://cdn.test/files/c.txt?expires={}", at.timestamp())
        );
        assert!(filesystem(FilesystemOptions::default()).temporary_url("c.txt", at).is_none());
    }
}
