//! Local filesystem driver / 本地文件系统驱动

mod driver;

pub use driver::LocalAdapter;

use serde::{Deserialize, Deserializer};

use crate::storage::Visibility;

/// Backend-specific options of a local disk / 本地磁盘特有配置
#[derive(Debug, Clone, Deserialize)]
pub struct LocalOptions {
    /// Hold an exclusive lock while writing / 写入时持有排他锁
    #[serde(default = "default_lock")]
    pub lock: bool,
    #[serde(default)]
    pub permissions: PortableVisibility,
    #[serde(default)]
    pub links: LinkHandling,
}

fn default_lock() -> bool {
    true
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            lock: default_lock(),
            permissions: PortableVisibility::default(),
            links: LinkHandling::default(),
        }
    }
}

/// What listing does with symbolic links / 列表时如何处理符号链接
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkHandling {
    /// Leave them out / 跳过
    Skip,
    /// Fail the listing / 报错
    #[default]
    Disallow,
}

/// Unix modes for one kind of node / 一类节点的权限位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ModePair {
    #[serde(deserialize_with = "deserialize_mode")]
    pub public: u32,
    #[serde(deserialize_with = "deserialize_mode")]
    pub private: u32,
}

/// Visibility ⇄ unix mode mapping / 可见性与 unix 权限位映射
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortableVisibility {
    pub file: ModePair,
    pub dir: ModePair,
}

impl Default for PortableVisibility {
    fn default() -> Self {
        Self {
            file: ModePair { public: 0o644, private: 0o600 },
            dir: ModePair { public: 0o755, private: 0o700 },
        }
    }
}

impl PortableVisibility {
    pub fn for_file(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.file.public,
            Visibility::Private => self.file.private,
        }
    }

    pub fn for_dir(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.dir.public,
            Visibility::Private => self.dir.private,
        }
    }

    pub fn inverse_for_file(&self, mode: u32) -> Visibility {
        Self::inverse(self.file, mode)
    }

    pub fn inverse_for_dir(&self, mode: u32) -> Visibility {
        Self::inverse(self.dir, mode)
    }

    fn inverse(pair: ModePair, mode: u32) -> Visibility {
        let mode = mode & 0o777;
        if mode == pair.public {
            Visibility::Public
        } else if mode == pair.private {
            Visibility::Private
        } else if mode & 0o044 != 0 {
            // Unknown mode: readable by group/others counts as public
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

/// Accept `420` or `"0644"` / 支持数字或八进制字符串
fn deserialize_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mode {
        Number(u32),
        Text(String),
    }

    match Mode::deserialize(deserializer)? {
        Mode::Number(n) => Ok(n),
        Mode::Text(s) => {
            let digits = s.trim().trim_start_matches("0o");
            u32::from_str_radix(digits, 8).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options: LocalOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(options.lock);
        assert_eq!(options.links, LinkHandling::Disallow);
        assert_eq!(options.permissions.for_file(Visibility::Public), 0o644);
        assert_eq!(options.permissions.for_dir(Visibility::Private), 0o700);
    }

    #[test]
    fn test_permission_overrides() {
        let options: LocalOptions = serde_json::from_value(serde_json::json!({
            "lock": false,
            "links": "skip",
            "permissions": {
                "file": { "public": "0664", "private": 384 },
                "dir": { "public": "0775", "private": "0700" }
            }
        }))
        .unwrap();
        assert!(!options.lock);
        assert_eq!(options.links, LinkHandling::Skip);
        assert_eq!(options.permissions.for_file(Visibility::Public), 0o664);
        assert_eq!(options.permissions.for_file(Visibility::Private), 0o600);
        assert_eq!(options.permissions.for_dir(Visibility::Public), 0o775);
    }

    #[test]
    fn test_inverse_mapping() {
        let modes = PortableVisibility::default();
        assert_eq!(modes.inverse_for_file(0o100644), Visibility::Public);
        assert_eq!(modes.inverse_for_file(0o600), Visibility::Private);
        assert_eq!(modes.inverse_for_file(0o640), Visibility::Public);
        assert_eq!(modes.inverse_for_dir(0o711), Visibility::Private);
    }
}
