//! In-memory storage driver / 内存存储驱动
//!
//! Keeps everything in a BTreeMap behind a lock. Used for tests and scratch disks.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::config::DiskConfig;
use crate::storage::{
    Driver, DriverFactory, Entry, ReadStream, StorageAdapter, StorageError, Visibility, WriteOptions,
};

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Vec<u8>,
    visibility: Visibility,
    last_modified: DateTime<Utc>,
    mime_type: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, MemoryFile>,
    directories: BTreeSet<String>,
}

pub struct MemoryAdapter {
    state: RwLock<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn with_file<T>(&self, path: &str, f: impl FnOnce(&MemoryFile) -> T) -> Result<T> {
        let state = self.state.read();
        state
            .files
            .get(path)
            .map(f)
            .ok_or_else(|| anyhow!("File not found: {}", path))
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Is `path` inside directory `dir` ("" is the root) / 判断路径是否在目录下
fn is_under(dir: &str, path: &str) -> bool {
    dir.is_empty() || path.strip_prefix(dir).map_or(false, |rest| rest.starts_with('/'))
}

/// Every ancestor directory of a path, nearest last / 路径的所有父目录
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}

impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.state.read().files.contains_key(path))
    }

    fn directory_exists(&self, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Ok(true);
        }
        let state = self.state.read();
        Ok(state.directories.contains(path)
            || state.files.keys().any(|key| is_under(path, key))
            || state.directories.iter().any(|dir| is_under(path, dir)))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.with_file(path, |file| file.contents.clone())
    }

    fn open_reader(&self, path: &str) -> Result<ReadStream> {
        let contents = self.read(path)?;
        Ok(Box::new(Cursor::new(contents)))
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> Result<()> {
        let mut buf = Vec::new();
        contents.read_to_end(&mut buf)?;
        let mut state = self.state.write();
        if state.directories.contains(path) {
            return Err(anyhow!("A directory exists at: {}", path));
        }
        state.files.insert(
            path.to_string(),
            MemoryFile {
                contents: buf,
                visibility: options.visibility.unwrap_or(Visibility::Public),
                last_modified: Utc::now(),
                mime_type: options.mime_type.clone(),
            },
        );
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.state.write().files.remove(path);
        Ok(())
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        let mut state = self.state.write();
        state.files.retain(|key, _| !is_under(path, key));
        state.directories.retain(|dir| dir != path && !is_under(path, dir));
        Ok(())
    }

    fn create_dir(&self, path: &str, _options: &WriteOptions) -> Result<()> {
        let mut state = self.state.write();
        if state.files.contains_key(path) {
            return Err(anyhow!("A file exists at: {}", path));
        }
        if !path.is_empty() {
            state.directories.insert(path.to_string());
        }
        Ok(())
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let mut state = self.state.write();
        let file = state
            .files
            .get_mut(path)
            .ok_or_else(|| anyhow!("File not found: {}", path))?;
        file.visibility = visibility;
        Ok(())
    }

    fn visibility(&self, path: &str) -> Result<Visibility> {
        self.with_file(path, |file| file.visibility)
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        let stored = self.with_file(path, |file| file.mime_type.clone())?;
        stored
            .or_else(|| mime_guess::from_path(path).first().map(|mime| mime.to_string()))
            .ok_or_else(|| anyhow!("Unable to detect mime type: {}", path))
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        self.with_file(path, |file| file.last_modified)
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.with_file(path, |file| file.contents.len() as u64)
    }

    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        let state = self.state.read();
        let depth = |p: &str| p.matches('/').count();
        let base_depth = if path.is_empty() { 0 } else { depth(path) + 1 };
        let visible = |p: &str| is_under(path, p) && (deep || depth(p) == base_depth);

        let mut dirs: Vec<String> = Vec::new();
        let mut push_dir = |dir: &str| {
            if visible(dir) && !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_string());
            }
        };
        for dir in &state.directories {
            push_dir(dir);
            ancestors(dir).for_each(&mut push_dir);
        }
        for key in state.files.keys() {
            ancestors(key).for_each(&mut push_dir);
        }

        let mut entries: Vec<Entry> = dirs.into_iter().map(Entry::dir).collect();
        for (key, file) in state.files.iter().filter(|(key, _)| visible(key)) {
            let mut entry = Entry::file(key.clone(), file.contents.len() as u64).modified(Some(file.last_modified));
            entry.visibility = Some(file.visibility);
            entries.push(entry);
        }
        Ok(entries)
    }

    fn move_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let mut state = self.state.write();
        let mut file = state
            .files
            .remove(source)
            .ok_or_else(|| anyhow!("File not found: {}", source))?;
        if let Some(visibility) = options.visibility {
            file.visibility = visibility;
        }
        state.files.insert(destination.to_string(), file);
        Ok(())
    }

    fn copy_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let mut state = self.state.write();
        let mut file = state
            .files
            .get(source)
            .cloned()
            .ok_or_else(|| anyhow!("File not found: {}", source))?;
        if let Some(visibility) = options.visibility {
            file.visibility = visibility;
        }
        file.last_modified = Utc::now();
        state.files.insert(destination.to_string(), file);
        Ok(())
    }
}

/// Memory driver factory / 内存驱动工厂
pub struct MemoryDriverFactory;

impl DriverFactory for MemoryDriverFactory {
    fn driver_type(&self) -> &str {
        "memory"
    }

    fn create_driver(&self, config: &DiskConfig) -> Result<Driver, StorageError> {
        tracing::debug!("Memory driver initialized for disk [{}]", config.name);
        Ok(Driver::new(Arc::new(MemoryAdapter::new()), config.clone()))
    }
}
