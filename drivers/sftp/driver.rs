//! SFTP adapter over russh / 基于 russh 的 SFTP 适配器
//!
//! russh is async-only; every primitive runs on the adapter's own
//! [`BlockingRuntime`] and one SSH session is kept open between calls.
//! russh 只有异步 API，所有操作在适配器自己的运行时上完成，并复用同一个 SSH 会话。

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use russh::client::{self, Config, Handle, Handler};
use russh::keys::PublicKey;
use russh_sftp::client::fs::File as SftpFile;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::SyncIoBridge;

use super::SftpConfig;
use crate::storage::blocking::BlockingRuntime;
use crate::storage::{
    Entry, PathPrefixer, ReadStream, StorageAdapter, UrlFamily, Visibility, WriteOptions,
};
use crate::utils::dirname;

const CHUNK_SIZE: usize = 32 * 1024;

/// Strip separators, case and the `SHA256:` tag from a fingerprint
/// 规范化指纹：去掉冒号、大小写与 SHA256: 前缀
pub(crate) fn normalize_fingerprint(fingerprint: &str) -> String {
    let lowered = fingerprint.trim().replace(':', "").to_lowercase();
    lowered.trim_start_matches("sha256").to_string()
}

/// Checks the server key against the configured fingerprint / SSH 客户端 Handler
struct SshClientHandler {
    strict_host_key: bool,
    expected_fingerprint: Option<String>,
}

#[async_trait]
impl Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        use russh::keys::HashAlg;
        let fingerprint = format!("{}", server_public_key.fingerprint(HashAlg::Sha256));

        if self.strict_host_key {
            let Some(expected) = &self.expected_fingerprint else {
                tracing::error!("Strict host key checking enabled without host_fingerprint");
                return Ok(false);
            };
            if normalize_fingerprint(expected) != normalize_fingerprint(&fingerprint) {
                tracing::error!(
                    "SFTP host fingerprint mismatch, expected: {}, actual: {}",
                    expected,
                    fingerprint
                );
                return Ok(false);
            }
        }

        tracing::debug!("SSH server fingerprint: {}", fingerprint);
        Ok(true)
    }
}

/// SSH session kept alive together with its SFTP channel / 保持存活的 SSH 会话
struct SshConnection {
    session: Handle<SshClientHandler>,
    sftp: SftpSession,
}

/// Read handle: a remote file bridged to `std::io::Read` / 远程文件的同步读取句柄
struct SftpReadStream {
    inner: Option<(SyncIoBridge<SftpFile>, Arc<SshConnection>)>,
    runtime: BlockingRuntime,
}

impl Read for SftpReadStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.inner.as_mut() {
            Some((bridge, _)) => bridge.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for SftpReadStream {
    fn drop(&mut self) {
        // Closing a remote file spawns on the runtime
        if let Some(inner) = self.inner.take() {
            self.runtime.drop_in_context(inner);
        }
    }
}

pub struct SftpAdapter {
    config: SftpConfig,
    prefixer: PathPrefixer,
    runtime: BlockingRuntime,
    connection: Mutex<Option<Arc<SshConnection>>>,
}

impl SftpAdapter {
    pub fn new(config: SftpConfig, root: &str) -> Result<Self> {
        Ok(Self {
            config,
            prefixer: PathPrefixer::new(root, '/'),
            runtime: BlockingRuntime::new("sftp")?,
            connection: Mutex::new(None),
        })
    }

    fn remote(&self, path: &str) -> String {
        let full = self.prefixer.prefix_path(path);
        let trimmed = full.trim_end_matches('/');
        match (trimmed.is_empty(), self.prefixer.prefix().is_empty()) {
            // No root configured: the login directory
            (true, true) => ".".to_string(),
            (true, false) => "/".to_string(),
            _ => trimmed.to_string(),
        }
    }

    async fn create_connection(&self) -> Result<SshConnection> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        tracing::debug!("SFTP: connecting to {}", addr);

        let handler = SshClientHandler {
            strict_host_key: self.config.strict_host_key,
            expected_fingerprint: self.config.host_fingerprint.clone(),
        };
        let mut session = tokio::time::timeout(
            Duration::from_secs(self.config.timeout),
            client::connect(Arc::new(Config::default()), &addr, handler),
        )
        .await
        .map_err(|_| anyhow!("SFTP connection timed out: {}", addr))?
        .map_err(|e| anyhow!("SSH handshake failed: {} - {}", addr, e))?;

        self.authenticate(&mut session).await?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| anyhow!("Failed to open SSH channel: {}", e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| anyhow!("Failed to request sftp subsystem: {}", e))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| anyhow!("Failed to start SFTP session: {}", e))?;

        tracing::info!("SFTP connected: {}", addr);
        Ok(SshConnection { session, sftp })
    }

    async fn authenticate(&self, session: &mut Handle<SshClientHandler>) -> Result<()> {
        let username = &self.config.username;

        if let Some(key_path) = &self.config.private_key {
            let key_path = Path::new(key_path);
            let key_pair = russh_keys::load_secret_key(key_path, self.config.passphrase.as_deref())
                .map_err(|e| anyhow!("Failed to load private key: {} - {}", key_path.display(), e))?;
            let accepted = session
                .authenticate_publickey(username, Arc::new(key_pair))
                .await
                .map_err(|e| anyhow!("Public key authentication failed: {}", e))?;
            if !accepted {
                return Err(anyhow!("Public key rejected by server"));
            }
        } else if let Some(password) = &self.config.password {
            let accepted = session
                .authenticate_password(username, password)
                .await
                .map_err(|e| anyhow!("Password authentication failed: {}", e))?;
            if !accepted {
                return Err(anyhow!("Password rejected by server"));
            }
        } else {
            return Err(anyhow!("Either password or private_key is required"));
        }
        Ok(())
    }

    /// Cached connection, reconnecting once the session closed / 复用连接，断开后重连
    fn connection(&self) -> Result<Arc<SshConnection>> {
        let mut guard = self.connection.lock();
        if let Some(conn) = guard.as_ref() {
            if !conn.session.is_closed() {
                return Ok(conn.clone());
            }
        }
        if let Some(stale) = guard.take() {
            self.runtime.drop_in_context(stale);
        }
        let conn = Arc::new(self.runtime.block_on(self.create_connection())?);
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn stat_blocking(&self, path: &str) -> Result<Option<FileAttributes>> {
        let conn = self.connection()?;
        self.runtime.block_on(stat(&conn.sftp, &self.remote(path)))
    }

    fn require(&self, path: &str) -> Result<FileAttributes> {
        self.stat_blocking(path)?
            .ok_or_else(|| anyhow!("File not found: {}", path))
    }

    /// Create every missing segment of a directory / 逐级创建目录
    async fn ensure_directory(&self, sftp: &SftpSession, dir: &str, visibility: Option<Visibility>) -> Result<()> {
        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            let remote = self.remote(&current);
            if stat(sftp, &remote).await?.is_some() {
                continue;
            }
            sftp.create_dir(remote.clone())
                .await
                .map_err(|e| anyhow!("Failed to create directory {}: {}", current, e))?;
            if let Some(visibility) = visibility {
                chmod(sftp, &remote, self.config.permissions.for_dir(visibility)).await?;
            }
        }
        Ok(())
    }

    async fn walk(&self, sftp: &SftpSession, path: &str, deep: bool) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let mut pending = vec![path.to_string()];
        while let Some(dir) = pending.pop() {
            let entries = sftp
                .read_dir(self.remote(&dir))
                .await
                .map_err(|e| anyhow!("Failed to list directory {}: {}", dir, e))?;
            for item in entries {
                let name = item.file_name();
                if name == "." || name == ".." {
                    continue;
                }
                let logical = if dir.is_empty() { name } else { format!("{}/{}", dir, name) };
                let attrs = item.metadata();
                let is_dir = attrs.is_dir();
                let mut entry = if is_dir {
                    Entry::dir(logical.clone())
                } else {
                    Entry::file(logical.clone(), attrs.size.unwrap_or(0))
                };
                entry.last_modified = modified_of(&attrs);
                entry.visibility = attrs.permissions.map(|mode| self.visibility_of(mode, is_dir));
                out.push(entry);
                if deep && is_dir {
                    pending.push(logical);
                }
            }
        }
        Ok(out)
    }

    /// Remove a directory and everything below it / 递归删除
    async fn remove_recursive(&self, sftp: &SftpSession, remote: &str) -> Result<()> {
        tracing::debug!("SFTP: deleting {}", remote);
        let attrs = sftp
            .metadata(remote.to_string())
            .await
            .map_err(|e| anyhow!("Failed to stat {}: {}", remote, e))?;

        if attrs.is_dir() {
            let entries = sftp
                .read_dir(remote.to_string())
                .await
                .map_err(|e| anyhow!("Failed to list directory {}: {}", remote, e))?;
            for item in entries {
                let name = item.file_name();
                if name == "." || name == ".." {
                    continue;
                }
                let child = format!("{}/{}", remote.trim_end_matches('/'), name);
                Box::pin(self.remove_recursive(sftp, &child)).await?;
            }
            sftp.remove_dir(remote.to_string())
                .await
                .map_err(|e| anyhow!("Failed to delete directory {}: {}", remote, e))?;
        } else {
            sftp.remove_file(remote.to_string())
                .await
                .map_err(|e| anyhow!("Failed to delete {}: {}", remote, e))?;
        }
        Ok(())
    }

    fn visibility_of(&self, mode: u32, is_dir: bool) -> Visibility {
        if is_dir {
            self.config.permissions.inverse_for_dir(mode)
        } else {
            self.config.permissions.inverse_for_file(mode)
        }
    }
}

/// `None` when the path does not exist / 路径不存在时返回 None
async fn stat(sftp: &SftpSession, remote: &str) -> Result<Option<FileAttributes>> {
    use russh_sftp::client::error::Error as SftpError;
    use russh_sftp::protocol::StatusCode;

    match sftp.metadata(remote.to_string()).await {
        Ok(attrs) => Ok(Some(attrs)),
        Err(SftpError::Status(status)) if status.status_code == StatusCode::NoSuchFile => Ok(None),
        Err(e) => Err(anyhow!("Failed to stat {}: {}", remote, e)),
    }
}

async fn chmod(sftp: &SftpSession, remote: &str, mode: u32) -> Result<()> {
    let mut attrs = FileAttributes::empty();
    attrs.permissions = Some(mode);
    sftp.set_metadata(remote.to_string(), attrs)
        .await
        .map_err(|e| anyhow!("chmod {:o} failed for {}: {}", mode, remote, e))
}

fn modified_of(attrs: &FileAttributes) -> Option<DateTime<Utc>> {
    attrs.mtime.and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
}

impl StorageAdapter for SftpAdapter {
    fn name(&self) -> &str {
        "sftp"
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat_blocking(path)?.map_or(false, |attrs| !attrs.is_dir()))
    }

    fn directory_exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat_blocking(path)?.map_or(false, |attrs| attrs.is_dir()))
    }

    fn open_reader(&self, path: &str) -> Result<ReadStream> {
        let conn = self.connection()?;
        let file = self
            .runtime
            .block_on(conn.sftp.open(self.remote(path)))
            .map_err(|e| anyhow!("Failed to open {}: {}", path, e))?;
        let bridge = SyncIoBridge::new_with_handle(file, self.runtime.handle());
        Ok(Box::new(SftpReadStream {
            inner: Some((bridge, conn)),
            runtime: self.runtime.clone(),
        }))
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> Result<()> {
        let conn = self.connection()?;
        let remote = self.remote(path);
        tracing::debug!("SFTP: writing {}", remote);
        let mut file = self.runtime.block_on(async {
            self.ensure_directory(&conn.sftp, dirname(path), options.directory_visibility)
                .await?;
            conn.sftp
                .create(remote.clone())
                .await
                .map_err(|e| anyhow!("Failed to create {}: {}", path, e))
        })?;

        // The source is read outside the runtime, it may itself be a bridged stream
        let mut buf = vec![0u8; CHUNK_SIZE];
        let copied: Result<()> = loop {
            let n = match contents.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e.into()),
            };
            if let Err(e) = self.runtime.block_on(file.write_all(&buf[..n])) {
                break Err(anyhow!("Failed to upload {}: {}", path, e));
            }
        };
        let closed = self.runtime.block_on(file.shutdown());
        self.runtime.drop_in_context(file);
        copied?;
        closed.map_err(|e| anyhow!("Failed to finish upload {}: {}", path, e))?;

        if let Some(visibility) = options.visibility {
            self.runtime
                .block_on(chmod(&conn.sftp, &remote, self.config.permissions.for_file(visibility)))?;
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let conn = self.connection()?;
        let remote = self.remote(path);
        self.runtime.block_on(async {
            if stat(&conn.sftp, &remote).await?.is_none() {
                return Ok(());
            }
            conn.sftp
                .remove_file(remote.clone())
                .await
                .map_err(|e| anyhow!("Failed to delete {}: {}", path, e))
        })
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        let conn = self.connection()?;
        let remote = self.remote(path);
        self.runtime.block_on(async {
            if stat(&conn.sftp, &remote).await?.is_none() {
                return Ok(());
            }
            self.remove_recursive(&conn.sftp, &remote).await
        })
    }

    fn create_dir(&self, path: &str, options: &WriteOptions) -> Result<()> {
        let conn = self.connection()?;
        self.runtime
            .block_on(self.ensure_directory(&conn.sftp, path, options.visibility))
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let attrs = self.require(path)?;
        let mode = if attrs.is_dir() {
            self.config.permissions.for_dir(visibility)
        } else {
            self.config.permissions.for_file(visibility)
        };
        let conn = self.connection()?;
        self.runtime.block_on(chmod(&conn.sftp, &self.remote(path), mode))
    }

    fn visibility(&self, path: &str) -> Result<Visibility> {
        let attrs = self.require(path)?;
        let mode = attrs
            .permissions
            .ok_or_else(|| anyhow!("Server returned no permissions: {}", path))?;
        Ok(self.visibility_of(mode, attrs.is_dir()))
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
        let attrs = self.require(path)?;
        modified_of(&attrs).ok_or_else(|| anyhow!("Server returned no mtime: {}", path))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        let attrs = self.require(path)?;
        if attrs.is_dir() {
            return Err(anyhow!("Not a file: {}", path));
        }
        attrs.size.ok_or_else(|| anyhow!("Server returned no size: {}", path))
    }

    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        let conn = self.connection()?;
        self.runtime.block_on(self.walk(&conn.sftp, path, deep))
    }

    fn move_item(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        let conn = self.connection()?;
        self.runtime.block_on(async {
            self.ensure_directory(&conn.sftp, dirname(destination), options.directory_visibility)
                .await?;
            conn.sftp
                .rename(self.remote(source), self.remote(destination))
                .await
                .map_err(|e| anyhow!("Failed to move {} to {}: {}", source, destination, e))
        })
    }

    fn url_family(&self) -> Option<UrlFamily> {
        Some(UrlFamily::RemoteTransfer)
    }
}

impl Drop for SftpAdapter {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            self.runtime.drop_in_context(conn);
        }
    }
}
