//! FTP storage driver / FTP 存储驱动

mod driver;

pub use driver::FtpAdapter;

use serde::Deserialize;
use std::sync::Arc;

use crate::config::DiskConfig;
use crate::storage::{Driver, DriverFactory, StorageError};

/// FTP connection settings / FTP 连接配置
#[derive(Debug, Clone, Deserialize)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_passive")]
    pub passive: bool,
    /// Seconds, applied to connect and read / 超时秒数
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

fn default_passive() -> bool {
    true
}

fn default_timeout() -> u64 {
    90
}

impl FtpConfig {
    pub fn for_host(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            passive: default_passive(),
            timeout: default_timeout(),
        }
    }
}

pub struct FtpDriverFactory;

impl DriverFactory for FtpDriverFactory {
    fn driver_type(&self) -> &str {
        "ftp"
    }

    fn create_driver(&self, config: &DiskConfig) -> Result<Driver, StorageError> {
        let ftp_config: FtpConfig = config.backend()?;
        if ftp_config.host.trim().is_empty() {
            return Err(StorageError::invalid_configuration(&config.name, "missing host"));
        }
        tracing::info!(
            "FTP driver initialized: {}:{}, root: {:?}",
            ftp_config.host,
            ftp_config.port,
            config.root
        );
        // Connection is opened lazily on first use
        let adapter = FtpAdapter::new(ftp_config, &config.root);
        Ok(Driver::new(Arc::new(adapter), config.clone()))
    }
}
