//! SFTP storage driver (russh) / SFTP 存储驱动

mod driver;

pub use driver::SftpAdapter;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::DiskConfig;
use crate::drivers::local::PortableVisibility;
use crate::storage::{Driver, DriverFactory, StorageError};

/// SFTP connection settings / SFTP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    /// Host name or IP / 主机名或 IP
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Password (either this or a private key) / 密码（与私钥二选一）
    #[serde(default)]
    pub password: Option<String>,
    /// Path of a private key file / 私钥路径
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Reject servers whose key does not match `host_fingerprint` / 强制校验主机指纹
    #[serde(default)]
    pub strict_host_key: bool,
    /// Expected SHA256 fingerprint / 预期主机指纹
    #[serde(default)]
    pub host_fingerprint: Option<String>,
    /// Connect timeout in seconds / 连接超时秒数
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default, skip_serializing)]
    pub permissions: PortableVisibility,
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    30
}

impl SftpConfig {
    fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("missing host".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("missing username".to_string());
        }
        if self.password.is_none() && self.private_key.is_none() {
            return Err("either password or private_key is required".to_string());
        }
        if self.strict_host_key && self.host_fingerprint.is_none() {
            return Err("strict_host_key needs host_fingerprint".to_string());
        }
        Ok(())
    }
}

pub struct SftpDriverFactory;

impl DriverFactory for SftpDriverFactory {
    fn driver_type(&self) -> &str {
        "sftp"
    }

    fn create_driver(&self, config: &DiskConfig) -> Result<Driver, StorageError> {
        let sftp_config: SftpConfig = config.backend()?;
        sftp_config
            .validate()
            .map_err(|reason| StorageError::invalid_configuration(&config.name, reason))?;

        let adapter = SftpAdapter::new(sftp_config, &config.root)
            .map_err(|e| StorageError::invalid_configuration(&config.name, e.to_string()))?;
        tracing::info!("SFTP driver initialized, root: {:?}", config.root);
        Ok(Driver::new(Arc::new(adapter), config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sftp_disk() -> DiskConfig {
        DiskConfig::new("sftp", "/home/deploy")
            .named("sftp")
            .option("host", "sftp.test")
            .option("username", "deploy")
    }

    #[test]
    fn test_config_defaults() {
        let config: SftpConfig = sftp_disk().option("password", "secret").backend().unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.timeout, 30);
        assert!(!config.strict_host_key);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let no_credentials: SftpConfig = sftp_disk().backend().unwrap();
        assert!(no_credentials.validate().is_err());

        let strict: SftpConfig = sftp_disk()
            .option("private_key", "/keys/id_ed25519")
            .option("strict_host_key", true)
            .backend()
            .unwrap();
        assert!(strict.validate().is_err());

        assert!(matches!(
            SftpDriverFactory.create_driver(&sftp_disk()),
            Err(StorageError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_sftp_urls_without_connecting() {
        let config = sftp_disk().option("password", "secret");
        let driver = SftpDriverFactory.create_driver(&config).unwrap();
        assert_eq!(driver.url("releases/v1.tar.gz").unwrap(), "releases/v1.tar.gz");

        let driver = SftpDriverFactory
            .create_driver(&config.url("https://cdn.test"))
            .unwrap();
        assert_eq!(driver.url("a.txt").unwrap(), "https://cdn.test/a.txt");
    }
}
