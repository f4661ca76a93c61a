use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use super::{LinkHandling, LocalOptions, PortableVisibility};
use crate::storage::{
    Entry, PathPrefixer, ReadStream, StorageAdapter, UrlFamily, Visibility, WriteOptions,
};

pub struct LocalAdapter {
    root: PathBuf,
    prefixer: PathPrefixer,
    permissions: PortableVisibility,
    lock: bool,
    links: LinkHandling,
}

impl LocalAdapter {
    pub fn new(root: PathBuf) -> Self {
        Self::with_options(root, LocalOptions::default())
    }

    pub fn with_options(root: PathBuf, options: LocalOptions) -> Self {
        let prefixer = PathPrefixer::new(&root.to_string_lossy(), MAIN_SEPARATOR);
        Self {
            root,
            prefixer,
            permissions: options.permissions,
            lock: options.lock,
            links: options.links,
        }
    }

    /// Get root directory / 获取根目录
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        PathBuf::from(self.prefixer.prefix_path(path))
    }

    /// Logical path of a physical one / 物理路径转换为逻辑路径
    fn logical_path(&self, full: &Path) -> String {
        self.prefixer
            .strip_prefix(&full.to_string_lossy())
            .replace('\\', "/")
    }

    /// Ensure the parent directory exists / 确保父目录存在
    fn ensure_parent(&self, full: &Path, visibility: Option<Visibility>) -> Result<()> {
        if let Some(parent) = full.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                if let Some(visibility) = visibility {
                    self.chmod(parent, self.permissions.for_dir(visibility))?;
                }
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn chmod(&self, full: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(full, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn chmod(&self, _full: &Path, _mode: u32) -> Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn mode_of(metadata: &fs::Metadata) -> Option<u32> {
        use std::os::unix::fs::PermissionsExt;
        Some(metadata.permissions().mode())
    }

    #[cfg(not(unix))]
    fn mode_of(_metadata: &fs::Metadata) -> Option<u32> {
        None
    }

    fn entry_for(&self, full: &Path, metadata: &fs::Metadata) -> Entry {
        let path = self.logical_path(full);
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        let mut entry = if metadata.is_dir() {
            Entry::dir(path)
        } else {
            Entry::file(path, metadata.len())
        };
        entry.last_modified = modified;
        entry.visibility = Self::mode_of(metadata).map(|mode| {
            if metadata.is_dir() {
                self.permissions.inverse_for_dir(mode)
            } else {
                self.permissions.inverse_for_file(mode)
            }
        });
        entry
    }

    fn walk(&self, dir: &Path, deep: bool, out: &mut Vec<Entry>) -> Result<()> {
        for item in fs::read_dir(dir)? {
            let item = item?;
            let full = item.path();
            if item.file_type()?.is_symlink() {
                match self.links {
                    LinkHandling::Skip => continue,
                    LinkHandling::Disallow => {
                        return Err(anyhow!("Symbolic links are not supported: {}", full.display()))
                    }
                }
            }
            let metadata = item.metadata()?;
            out.push(self.entry_for(&full, &metadata));
            if deep && metadata.is_dir() {
                self.walk(&full, deep, out)?;
            }
        }
        Ok(())
    }
}

impl StorageAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.full_path(path).is_file())
    }

    fn directory_exists(&self, path: &str) -> Result<bool> {
        Ok(self.full_path(path).is_dir())
    }

    fn open_reader(&self, path: &str) -> Result<ReadStream> {
        let file = fs::File::open(self.full_path(path))?;
        Ok(Box::new(file))
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> Result<()> {
        let full = self.full_path(path);
        self.ensure_parent(&full, options.directory_visibility)?;

        // Truncate only once the lock is held
        let mut file = OpenOptions::new().write(true).create(true).open(&full)?;
        if self.lock {
            file.lock_exclusive()?;
        }
        file.set_len(0)?;
        let written = io::copy(contents, &mut file);
        if self.lock {
            // Unlock failure is irrelevant once the handle is closed
            let _ = file.unlock();
        }
        written?;

        if let Some(visibility) = options.visibility {
            self.chmod(&full, self.permissions.for_file(visibility))?;
        }
        tracing::debug!("Local write: {:?}", full);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.full_path(path)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        match fs::remove_dir_all(self.full_path(path)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn create_dir(&self, path: &str, options: &WriteOptions) -> Result<()> {
        let full = self.full_path(path);
        fs::create_dir_all(&full)?;
        if let Some(visibility) = options.visibility {
            self.chmod(&full, self.permissions.for_dir(visibility))?;
        }
        Ok(())
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let full = self.full_path(path);
        let mode = if fs::metadata(&full)?.is_dir() {
            self.permissions.for_dir(visibility)
        } else {
            self.permissions.for_file(visibility)
        };
        self.chmod(&full, mode)
    }

    fn visibility(&self, path: &str) -> Result<Visibility> {
        let metadata = fs::metadata(self.full_path(path))?;
        Ok(match Self::mode_of(&metadata) {
            Some(mode) if metadata.is_dir() => self.permissions.inverse_for_dir(mode),
            Some(mode) => self.permissions.inverse_for_file(mode),
            None => Visibility::Public,
        })
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Err(anyhow!("File not found: {}", path));
        }
        Ok(mime_guess::from_path(&full)
            .first_or_octet_stream()
            .to_string())
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let modified = fs::metadata(self.full_path(path))?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        let metadata = fs::metadata(self.full_path(path))?;
        if metadata.is_dir() {
            return Err(anyhow!("Not a file: {}", path));
        }
        Ok(metadata.len())
    }

    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        let full = self.full_path(path);
        if !full.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        self.walk(&full, deep, &mut entries)?;
        Ok(entries)
    }

    fn move_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let to = self.full_path(destination);
        self.ensure_parent(&to, options.directory_visibility)?;
        fs::rename(self.full_path(source), &to)?;
        Ok(())
    }

    fn copy_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let to = self.full_path(destination);
        self.ensure_parent(&to, options.directory_visibility)?;
        fs::copy(self.full_path(source), &to)?;
        if let Some(visibility) = options.visibility {
            self.chmod(&to, self.permissions.for_file(visibility))?;
        }
        Ok(())
    }

    fn url_family(&self) -> Option<UrlFamily> {
        Some(UrlFamily::Local)
    }
}
