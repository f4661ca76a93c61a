//! Typed storage errors / 存储错误类型

use thiserror::Error;

/// Storage error taxonomy / 存储错误分类
///
/// Configuration and capability errors always reach the caller. Every other
/// kind is subject to the per-disk throw policy.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Disk [{0}] does not have a configured driver.")]
    ConfigurationNotFound(String),

    #[error("Invalid configuration for disk [{disk}]: {reason}")]
    InvalidConfiguration { disk: String, reason: String },

    #[error("Driver [{0}] is not supported.")]
    UnsupportedDriver(String),

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("Unable to generate url for location: {path}")]
    UrlGenerationFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to read file from location: {path}")]
    ReadFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to write file at location: {path}")]
    WriteFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to set visibility for file {path}")]
    VisibilitySetFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to copy file from {from} to {to}")]
    CopyFailure {
        from: String,
        to: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to move file from {from} to {to}")]
    MoveFailure {
        from: String,
        to: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to delete file(s) at location: {}", .paths.join(", "))]
    DeleteFailure {
        paths: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to create a directory at {path}")]
    DirectoryCreateFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to delete directory located at: {path}")]
    DirectoryDeleteFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to retrieve the {metadata} for file at location: {path}")]
    MetadataUnavailable {
        path: String,
        metadata: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl StorageError {
    pub fn invalid_configuration<S: Into<String>>(disk: &str, reason: S) -> Self {
        StorageError::InvalidConfiguration {
            disk: disk.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        StorageError::UnsupportedOperation(msg.into())
    }

    pub fn read(path: &str, source: anyhow::Error) -> Self {
        StorageError::ReadFailure { path: path.to_string(), source }
    }

    pub fn write(path: &str, source: anyhow::Error) -> Self {
        StorageError::WriteFailure { path: path.to_string(), source }
    }

    pub fn visibility(path: &str, source: anyhow::Error) -> Self {
        StorageError::VisibilitySetFailure { path: path.to_string(), source }
    }

    pub fn metadata(path: &str, metadata: &'static str, source: anyhow::Error) -> Self {
        StorageError::MetadataUnavailable { path: path.to_string(), metadata, source }
    }

    /// Misconfiguration rather than I/O trouble: bypasses the throw policy
    /// 配置类错误，不受 throw 策略影响
    pub fn always_propagates(&self) -> bool {
        matches!(
            self,
            StorageError::ConfigurationNotFound(_)
                | StorageError::InvalidConfiguration { .. }
                | StorageError::UnsupportedDriver(_)
                | StorageError::UnsupportedOperation(_)
                | StorageError::UrlGenerationFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_always_propagate() {
        assert!(StorageError::ConfigurationNotFound("s3".into()).always_propagates());
        assert!(StorageError::unsupported("no urls").always_propagates());
        assert!(StorageError::invalid_configuration("ftp", "missing host").always_propagates());
        assert!(!StorageError::read("a.txt", anyhow::anyhow!("gone")).always_propagates());
        assert!(!StorageError::DeleteFailure {
            paths: vec!["a".into()],
            source: anyhow::anyhow!("denied"),
        }
        .always_propagates());
    }

    #[test]
    fn test_delete_failure_lists_every_path() {
        let err = StorageError::DeleteFailure {
            paths: vec!["a.txt".into(), "b.txt".into()],
            source: anyhow::anyhow!("denied"),
        };
        assert_eq!(err.to_string(), "Unable to delete file(s) at location: a.txt, b.txt");
    }

    #[test]
    fn test_cause_reported_once() {
        let err = StorageError::write("a.txt", anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "Unable to write file at location: a.txt");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk full"));

        let chained = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chained, "Unable to write file at location: a.txt: disk full");
        assert_eq!(chained.matches("disk full").count(), 1);
    }
}
