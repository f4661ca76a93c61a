//! Filesystem configuration module / 文件系统配置模块
//!
//! Disk definitions loaded from filesystems.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::storage::{StorageError, Visibility};

/// Filesystem configuration / 文件系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Default disk name / 默认磁盘
    #[serde(default = "default_disk")]
    pub default: String,
    /// Cloud disk name / 云存储磁盘
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
    /// Disk definitions / 磁盘定义
    #[serde(default)]
    pub disks: BTreeMap<String, DiskConfig>,
}

fn default_disk() -> String {
    "local".to_string()
}

/// Single disk configuration / 单个磁盘配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Disk name, attached when resolved / 磁盘名称（解析时填充）
    #[serde(skip)]
    pub name: String,
    /// Backend kind (local, memory, ftp, sftp, s3, or a registered custom kind) / 后端类型
    #[serde(rename = "type", alias = "driver")]
    pub kind: String,
    /// Root path / 根目录
    #[serde(default)]
    pub root: String,
    /// Sub-prefix below the root / 根目录下的子前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Public URL base / 公开访问 URL 前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Default file visibility / 默认文件可见性
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Default directory visibility / 默认目录可见性
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_visibility: Option<Visibility>,
    /// Raise typed errors instead of returning sentinels / 失败时抛出错误而不是返回哨兵值
    #[serde(default)]
    pub throw: bool,
    /// Reject every write / 只读
    #[serde(default, rename = "read-only", alias = "read_only")]
    pub read_only: bool,
    /// Skip existence assertions before copy/move / 跳过复制移动前的存在性检查
    #[serde(default)]
    pub disable_asserts: bool,
    /// Temporary URL template, `{path}` and `{expires}` placeholders / 临时 URL 模板
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_url: Option<String>,
    /// URL base served by the filesystem facade itself / 文件系统门面的公开 URL 前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Backend-specific fields (credentials, connection params) / 后端特有配置
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl DiskConfig {
    pub fn new(kind: &str, root: &str) -> Self {
        Self {
            kind: kind.to_string(),
            root: root.to_string(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn prefix(mut self, val: &str) -> Self {
        self.prefix = Some(val.to_string());
        self
    }

    pub fn url(mut self, val: &str) -> Self {
        self.url = Some(val.to_string());
        self
    }

    pub fn visibility(mut self, val: Visibility) -> Self {
        self.visibility = Some(val);
        self
    }

    pub fn throw(mut self, val: bool) -> Self {
        self.throw = val;
        self
    }

    pub fn read_only(mut self, val: bool) -> Self {
        self.read_only = val;
        self
    }

    pub fn option(mut self, key: &str, val: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), val.into());
        self
    }

    /// Deserialize the backend-specific fields into a typed config
    /// 将后端特有字段解析为强类型配置
    pub fn backend<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        serde_json::from_value(Value::Object(self.options.clone()))
            .map_err(|e| StorageError::invalid_configuration(&self.name, e.to_string()))
    }
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        let mut disks = BTreeMap::new();
        disks.insert("local".to_string(), DiskConfig::new("local", "storage/app"));
        disks.insert(
            "public".to_string(),
            DiskConfig::new("local", "storage/app/public")
                .url("/storage")
                .visibility(Visibility::Public),
        );
        Self {
            default: default_disk(),
            cloud: None,
            disks,
        }
    }
}

impl FilesystemConfig {
    /// Resolve a disk configuration by name, with the name attached / 按名称获取磁盘配置
    pub fn disk(&self, name: &str) -> Option<DiskConfig> {
        self.disks.get(name).cloned().map(|config| config.named(name))
    }

    pub fn with_disk(mut self, name: &str, config: DiskConfig) -> Self {
        self.disks.insert(name.to_string(), config);
        self
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_json(&content)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("filesystems.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<FilesystemConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        let config = FilesystemConfig::from_file(&config_path)?;
        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = FilesystemConfig::default();
        save_config(&config, &config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &FilesystemConfig, path: &Path) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_disks() {
        let config = FilesystemConfig::from_json(
            r#"{
                "default": "uploads",
                "cloud": "s3",
                "disks": {
                    "uploads": { "type": "local", "root": "/srv/uploads", "throw": true, "read-only": true },
                    "s3": { "type": "s3", "root": "assets", "bucket": "media", "region": "eu-west-1" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.default, "uploads");
        let uploads = config.disk("uploads").unwrap();
        assert_eq!(uploads.name, "uploads");
        assert_eq!(uploads.kind, "local");
        assert!(uploads.throw);
        assert!(uploads.read_only);
        assert!(uploads.options.is_empty());

        let s3 = config.disk("s3").unwrap();
        assert_eq!(s3.root, "assets");
        assert_eq!(s3.options.get("bucket").and_then(|v| v.as_str()), Some("media"));
        assert!(!s3.throw);
        assert!(config.disk("missing").is_none());
    }

    #[test]
    fn test_backend_config_validation() {
        #[derive(Deserialize)]
        struct Credentials {
            host: String,
            #[serde(default)]
            port: Option<u16>,
        }

        let ok = DiskConfig::new("ftp", "/").named("ftp").option("host", "ftp.test");
        let creds: Credentials = ok.backend().unwrap();
        assert_eq!(creds.host, "ftp.test");
        assert_eq!(creds.port, None);

        let missing = DiskConfig::new("ftp", "/").named("ftp");
        match missing.backend::<Credentials>() {
            Err(StorageError::InvalidConfiguration { disk, reason }) => {
                assert_eq!(disk, "ftp");
                assert!(reason.contains("host"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_default_config() {
        let config = FilesystemConfig::default();
        assert_eq!(config.default, "local");
        let public = config.disk("public").unwrap();
        assert_eq!(public.visibility, Some(Visibility::Public));
        assert_eq!(public.url.as_deref(), Some("/storage"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filesystems.json");
        let config = FilesystemConfig::default()
            .with_disk("mem", DiskConfig::new("memory", "").option("seed", 7));
        save_config(&config, &path).unwrap();

        let reloaded = FilesystemConfig::from_file(&path).unwrap();
        let mem = reloaded.disk("mem").unwrap();
        assert_eq!(mem.kind, "memory");
        assert_eq!(mem.options.get("seed").and_then(|v| v.as_u64()), Some(7));
    }
}
