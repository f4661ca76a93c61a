//! S3 driver configuration / S3 驱动配置

use serde::{Deserialize, Serialize};

/// S3 configuration / S3 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name / 存储桶名称
    pub bucket: String,
    /// Endpoint
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(alias = "key")]
    pub access_key_id: String,
    #[serde(alias = "secret")]
    pub secret_access_key: String,
    /// Session token for temporary credentials / 临时凭证
    #[serde(default)]
    pub session_token: String,
    /// Public host (CDN) used for URLs / 自定义域名（用于 CDN）
    #[serde(default)]
    pub custom_host: String,
    /// Path style instead of virtual host style, needed by MinIO
    /// 强制使用路径风格（MinIO 等需要）
    #[serde(default, alias = "use_path_style_endpoint")]
    pub force_path_style: bool,
    /// Directory placeholder object name / 目录占位文件名
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Send `x-amz-acl` with writes, off for stores without ACL support
    /// 写入时附带 x-amz-acl
    #[serde(default = "default_acl")]
    pub acl: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_placeholder() -> String {
    ".keep".to_string()
}

fn default_acl() -> bool {
    true
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: String::new(),
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            custom_host: String::new(),
            force_path_style: false,
            placeholder: default_placeholder(),
            acl: default_acl(),
        }
    }
}

impl S3Config {
    pub fn endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("https://s3.{}.amazonaws.com", self.region)
        } else {
            self.endpoint.trim_end_matches('/').to_string()
        }
    }
}
