//! S3 driver factory / S3 驱动工厂

use std::sync::Arc;

use super::config::S3Config;
use super::driver::S3Adapter;
use crate::config::DiskConfig;
use crate::storage::{Driver, DriverFactory, StorageError};

pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn driver_type(&self) -> &str {
        "s3"
    }

    fn create_driver(&self, config: &DiskConfig) -> Result<Driver, StorageError> {
        let s3_config: S3Config = config.backend()?;
        if s3_config.bucket.trim().is_empty() {
            return Err(StorageError::invalid_configuration(&config.name, "missing bucket"));
        }
        let adapter = S3Adapter::new(s3_config, &config.root)
            .map_err(|e| StorageError::invalid_configuration(&config.name, e.to_string()))?;
        tracing::info!("S3 driver initialized: bucket {}, root: {:?}", adapter.bucket_name(), config.root);
        Ok(Driver::new(Arc::new(adapter), config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn s3_disk() -> DiskConfig {
        DiskConfig::new("s3", "uploads")
            .named("s3")
            .option("bucket", "assets")
            .option("region", "eu-west-1")
            .option("key", "AKIDEXAMPLE")
            .option("secret", "wJalrXUtnFEMI/K7MDENG")
    }

    #[test]
    fn test_requires_bucket_and_credentials() {
        let no_bucket = DiskConfig::new("s3", "").option("key", "a").option("secret", "b").option("bucket", "");
        assert!(matches!(
            S3DriverFactory.create_driver(&no_bucket),
            Err(StorageError::InvalidConfiguration { .. })
        ));

        let no_secret = DiskConfig::new("s3", "").option("bucket", "assets").option("key", "a");
        assert!(matches!(
            S3DriverFactory.create_driver(&no_secret),
            Err(StorageError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_public_urls_use_custom_host() {
        let driver = S3DriverFactory
            .create_driver(&s3_disk().option("custom_host", "https://cdn.test/"))
            .unwrap();
        assert_eq!(driver.url("img/a b.png").unwrap(), "https://cdn.test/uploads/img/a%20b.png");

        let scoped = S3DriverFactory
            .create_driver(&s3_disk().prefix("tenant-1").option("custom_host", "https://cdn.test"))
            .unwrap();
        assert_eq!(scoped.url("x.txt").unwrap(), "https://cdn.test/uploads/tenant-1/x.txt");
    }

    #[test]
    fn test_presigned_temporary_urls() {
        let driver = S3DriverFactory
            .create_driver(&s3_disk().option("endpoint", "http://minio.test:9000").option("force_path_style", true))
            .unwrap();
        assert!(driver.provides_temporary_urls());

        let url = driver
            .temporary_url("report.pdf", Utc::now() + Duration::minutes(5))
            .unwrap();
        assert!(url.starts_with("http://minio.test:9000/assets/uploads/report.pdf?"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=300") || url.contains("X-Amz-Expires=299"));
    }
}
