use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::io::Read;
use std::net::ToSocketAddrs;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};

use super::FtpConfig;
use crate::storage::{
    Entry, PathPrefixer, ReadStream, StorageAdapter, UrlFamily, Visibility, WriteOptions,
};
use crate::utils::dirname;

const FILE_PUBLIC: u32 = 0o644;
const FILE_PRIVATE: u32 = 0o600;
const DIR_PUBLIC: u32 = 0o755;
const DIR_PRIVATE: u32 = 0o700;

/// One parsed LIST line / 解析后的 LIST 行
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListItem {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mode: Option<u32>,
    pub modified: Option<DateTime<Utc>>,
}

/// Parse a LIST line, Unix or DOS style / 解析 Unix 或 DOS 风格的 LIST 输出
pub(crate) fn parse_list_line(line: &str) -> Option<ListItem> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 9 && parts[0].len() >= 10 {
        // drwxr-xr-x 2 user group 4096 Jan 1 12:00 filename
        let permissions = parts[0];
        let is_dir = permissions.starts_with('d');
        let mut name = parts[8..].join(" ");
        if permissions.starts_with('l') {
            if let Some(pos) = name.find(" -> ") {
                name.truncate(pos);
            }
        }
        if name == "." || name == ".." {
            return None;
        }
        return Some(ListItem {
            name,
            is_dir,
            size: if is_dir { 0 } else { parts[4].parse().unwrap_or(0) },
            mode: permissions_to_mode(permissions),
            modified: parse_unix_time(parts[5], parts[6], parts[7]),
        });
    }

    if parts.len() >= 4 && parts[0].contains('-') && parts[0].len() == 8 {
        // 01-16-24  10:20AM  <DIR>  docs
        let is_dir = parts[2].eq_ignore_ascii_case("<DIR>");
        let modified = NaiveDateTime::parse_from_str(&format!("{} {}", parts[0], parts[1]), "%m-%d-%y %I:%M%p")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive));
        return Some(ListItem {
            name: parts[3..].join(" "),
            is_dir,
            size: if is_dir { 0 } else { parts[2].parse().unwrap_or(0) },
            mode: None,
            modified,
        });
    }

    None
}

/// "rwxr-x---" style string to mode bits / 权限字符串转换为权限位
pub(crate) fn permissions_to_mode(permissions: &str) -> Option<u32> {
    let bits = permissions.get(1..10)?;
    Some(bits.chars().enumerate().fold(0, |mode, (i, c)| {
        if c == '-' {
            mode
        } else {
            mode | (1 << (8 - i))
        }
    }))
}

fn parse_unix_time(month: &str, day: &str, time_or_year: &str) -> Option<DateTime<Utc>> {
    let now = Utc::now();
    let (year, clock) = if time_or_year.contains(':') {
        (now.year(), time_or_year)
    } else {
        (time_or_year.parse().ok()?, "00:00")
    };
    let parse = |year: i32| {
        NaiveDateTime::parse_from_str(&format!("{} {} {} {}", year, month, day, clock), "%Y %b %d %H:%M")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    };
    let parsed = parse(year)?;
    // Recent entries omit the year; a date ahead of now belongs to last year
    if time_or_year.contains(':') && parsed > now + chrono::Duration::days(1) {
        return parse(year - 1);
    }
    Some(parsed)
}

fn visibility_of(mode: u32, is_dir: bool) -> Visibility {
    let (public, private) = if is_dir { (DIR_PUBLIC, DIR_PRIVATE) } else { (FILE_PUBLIC, FILE_PRIVATE) };
    match mode & 0o777 {
        m if m == public => Visibility::Public,
        m if m == private => Visibility::Private,
        m if m & 0o044 != 0 => Visibility::Public,
        _ => Visibility::Private,
    }
}

fn mode_for(visibility: Visibility, is_dir: bool) -> u32 {
    match (visibility, is_dir) {
        (Visibility::Public, false) => FILE_PUBLIC,
        (Visibility::Private, false) => FILE_PRIVATE,
        (Visibility::Public, true) => DIR_PUBLIC,
        (Visibility::Private, true) => DIR_PRIVATE,
    }
}

/// Read handle owning its own control connection / 持有独立控制连接的读取句柄
struct FtpReadStream {
    data: Option<Box<dyn Read + Send>>,
    control: Option<FtpStream>,
}

impl Read for FtpReadStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.data.as_mut() {
            Some(data) => data.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for FtpReadStream {
    fn drop(&mut self) {
        if let (Some(data), Some(mut control)) = (self.data.take(), self.control.take()) {
            if let Err(e) = control.finalize_retr_stream(data) {
                tracing::debug!("FTP transfer finalize failed: {}", e);
            }
            let _ = control.quit();
        }
    }
}

pub struct FtpAdapter {
    config: FtpConfig,
    prefixer: PathPrefixer,
    connection: Mutex<Option<FtpStream>>,
}

impl FtpAdapter {
    pub fn new(config: FtpConfig, root: &str) -> Self {
        Self {
            config,
            prefixer: PathPrefixer::new(root, '/'),
            connection: Mutex::new(None),
        }
    }

    fn connect(&self) -> Result<FtpStream> {
        let timeout = Duration::from_secs(self.config.timeout);
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow!("Unable to resolve FTP host: {}", self.config.host))?;

        let mut stream = FtpStream::connect_timeout(addr, timeout)
            .map_err(|e| anyhow!("FTP connection failed: {}", e))?;
        stream.get_ref().set_read_timeout(Some(timeout))?;
        stream
            .login(&self.config.username, &self.config.password)
            .map_err(|e| anyhow!("FTP login failed: {}", e))?;
        stream.set_mode(if self.config.passive { Mode::Passive } else { Mode::Active });
        stream.transfer_type(FileType::Binary)?;

        tracing::debug!("FTP connected: {}:{}", self.config.host, self.config.port);
        Ok(stream)
    }

    /// Run against the pooled connection, reconnecting when it went stale
    /// 使用连接池中的连接，失效时重连
    fn with_connection<T>(&self, f: impl FnOnce(&mut FtpStream) -> Result<T>) -> Result<T> {
        let mut guard = self.connection.lock();
        let alive = guard.as_mut().map_or(false, |conn| conn.pwd().is_ok());
        if !alive {
            *guard = Some(self.connect()?);
        }
        let conn = guard.as_mut().ok_or_else(|| anyhow!("FTP connection unavailable"))?;
        f(conn)
    }

    fn remote(&self, path: &str) -> String {
        self.prefixer.prefix_path(path)
    }

    fn remote_dir(&self, path: &str) -> String {
        let full = self.prefixer.prefix_directory_path(path);
        let trimmed = full.trim_end_matches('/');
        match (trimmed.is_empty(), self.prefixer.prefix().is_empty()) {
            // No root configured: the login directory
            (true, true) => ".".to_string(),
            (true, false) => "/".to_string(),
            _ => trimmed.to_string(),
        }
    }

    fn is_file(&self, conn: &mut FtpStream, path: &str) -> Result<bool> {
        match conn.size(self.remote(path)) {
            Ok(_) => Ok(true),
            Err(FtpError::UnexpectedResponse(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn is_dir(&self, conn: &mut FtpStream, path: &str) -> Result<bool> {
        let home = conn.pwd()?;
        let found = conn.cwd(self.remote_dir(path)).is_ok();
        conn.cwd(&home)?;
        Ok(found)
    }

    /// Create every missing segment of a directory / 逐级创建目录
    fn ensure_directory(&self, conn: &mut FtpStream, dir: &str, visibility: Option<Visibility>) -> Result<()> {
        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            if self.is_dir(conn, &current)? {
                continue;
            }
            let remote = self.remote_dir(&current);
            conn.mkdir(&remote)
                .map_err(|e| anyhow!("Failed to create directory {}: {}", current, e))?;
            if let Some(visibility) = visibility {
                conn.site(format!("CHMOD {:o} {}", mode_for(visibility, true), remote))?;
            }
        }
        Ok(())
    }

    fn list_items(&self, conn: &mut FtpStream, path: &str) -> Result<Vec<(String, ListItem)>> {
        let lines = conn
            .list(Some(&self.remote_dir(path)))
            .map_err(|e| anyhow!("Failed to list directory {}: {}", path, e))?;
        Ok(lines
            .iter()
            .filter_map(|line| parse_list_line(line))
            .map(|item| {
                let logical = if path.is_empty() {
                    item.name.clone()
                } else {
                    format!("{}/{}", path, item.name)
                };
                (logical, item)
            })
            .collect())
    }

    fn walk(&self, conn: &mut FtpStream, path: &str, deep: bool, out: &mut Vec<Entry>) -> Result<()> {
        for (logical, item) in self.list_items(conn, path)? {
            let mut entry = if item.is_dir {
                Entry::dir(logical.clone())
            } else {
                Entry::file(logical.clone(), item.size)
            };
            entry.last_modified = item.modified;
            entry.visibility = item.mode.map(|mode| visibility_of(mode, item.is_dir));
            out.push(entry);
            if deep && item.is_dir {
                self.walk(conn, &logical, deep, out)?;
            }
        }
        Ok(())
    }

    fn find_item(&self, conn: &mut FtpStream, path: &str) -> Result<ListItem> {
        let parent = dirname(path);
        self.list_items(conn, parent)?
            .into_iter()
            .find(|(logical, _)| logical == path)
            .map(|(_, item)| item)
            .ok_or_else(|| anyhow!("File not found: {}", path))
    }
}

impl StorageAdapter for FtpAdapter {
    fn name(&self) -> &str {
        "ftp"
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        self.with_connection(|conn| self.is_file(conn, path))
    }

    fn directory_exists(&self, path: &str) -> Result<bool> {
        self.with_connection(|conn| self.is_dir(conn, path))
    }

    fn open_reader(&self, path: &str) -> Result<ReadStream> {
        // Dedicated connection so the pooled one stays usable while the caller reads
        let mut control = self.connect()?;
        let data = control
            .retr_as_stream(self.remote(path))
            .map_err(|e| anyhow!("Failed to open {}: {}", path, e))?;
        Ok(Box::new(FtpReadStream {
            data: Some(Box::new(data)),
            control: Some(control),
        }))
    }

    fn write_stream(&self, path: &str, mut contents: &mut dyn Read, options: &WriteOptions) -> Result<()> {
        self.with_connection(|conn| {
            self.ensure_directory(conn, dirname(path), options.directory_visibility)?;
            let remote = self.remote(path);
            conn.put_file(&remote, &mut contents)
                .map_err(|e| anyhow!("Failed to upload {}: {}", path, e))?;
            if let Some(visibility) = options.visibility {
                conn.site(format!("CHMOD {:o} {}", mode_for(visibility, false), remote))?;
            }
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.with_connection(|conn| {
            if let Err(e) = conn.rm(self.remote(path)) {
                // Already gone counts as deleted
                if self.is_file(conn, path)? {
                    return Err(anyhow!("Failed to delete {}: {}", path, e));
                }
            }
            Ok(())
        })
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        self.with_connection(|conn| {
            let mut entries = Vec::new();
            self.walk(conn, path, true, &mut entries)?;
            // Deepest first so directories are empty when removed
            entries.sort_by_key(|entry| std::cmp::Reverse(entry.path.matches('/').count()));
            for entry in entries {
                if entry.is_dir {
                    conn.rmdir(self.remote_dir(&entry.path))?;
                } else {
                    conn.rm(self.remote(&entry.path))?;
                }
            }
            conn.rmdir(self.remote_dir(path))
                .map_err(|e| anyhow!("Failed to delete directory {}: {}", path, e))
        })
    }

    fn create_dir(&self, path: &str, options: &WriteOptions) -> Result<()> {
        self.with_connection(|conn| self.ensure_directory(conn, path, options.visibility))
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        self.with_connection(|conn| {
            let is_dir = !self.is_file(conn, path)? && self.is_dir(conn, path)?;
            let remote = if is_dir { self.remote_dir(path) } else { self.remote(path) };
            conn.site(format!("CHMOD {:o} {}", mode_for(visibility, is_dir), remote))
                .map_err(|e| anyhow!("CHMOD failed for {}: {}", path, e))?;
            Ok(())
        })
    }

    fn visibility(&self, path: &str) -> Result<Visibility> {
        self.with_connection(|conn| {
            let item = self.find_item(conn, path)?;
            let mode = item
                .mode
                .ok_or_else(|| anyhow!("Server listing carries no permissions: {}", path))?;
            Ok(visibility_of(mode, item.is_dir))
        })
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        if !self.file_exists(path)? {
            return Err(anyhow!("File not found: {}", path));
        }
        mime_guess::from_path(path)
            .first()
            .map(|mime| mime.to_string())
            .ok_or_else(|| anyhow!("Unable to detect mime type: {}", path))
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        self.with_connection(|conn| {
            let naive = conn.mdtm(self.remote(path))?;
            Ok(Utc.from_utc_datetime(&naive))
        })
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.with_connection(|conn| Ok(conn.size(self.remote(path))? as u64))
    }

    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        self.with_connection(|conn| {
            let mut entries = Vec::new();
            self.walk(conn, path, deep, &mut entries)?;
            Ok(entries)
        })
    }

    fn move_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        self.with_connection(|conn| {
            self.ensure_directory(conn, dirname(destination), options.directory_visibility)?;
            conn.rename(self.remote(source), self.remote(destination))
                .map_err(|e| anyhow!("Failed to move {} to {}: {}", source, destination, e))
        })
    }

    fn url_family(&self) -> Option<UrlFamily> {
        Some(UrlFamily::RemoteTransfer)
    }
}
