use std::path::PathBuf;
use std::sync::Arc;

use super::{Driver, DriverFactory, StorageError};
use crate::config::DiskConfig;
use crate::drivers::local::{LocalAdapter, LocalOptions};

pub struct LocalDriverFactory;

impl DriverFactory for LocalDriverFactory {
    fn driver_type(&self) -> &str {
        "local"
    }

    fn create_driver(&self, config: &DiskConfig) -> Result<Driver, StorageError> {
        if config.root.trim().is_empty() {
            return Err(StorageError::invalid_configuration(&config.name, "missing root"));
        }
        let options: LocalOptions = config.backend()?;

        let root = PathBuf::from(&config.root);
        let io_error = |e: std::io::Error| {
            StorageError::invalid_configuration(&config.name, format!("root {:?}: {}", root, e))
        };
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(io_error)?;
        }
        let canonical_root = root.canonicalize().map_err(io_error)?;

        tracing::info!("Local driver initialized, root: {:?}", canonical_root);

        let mut config = config.clone();
        config.root = canonical_root.to_string_lossy().to_string();
        let adapter = LocalAdapter::with_options(canonical_root, options);
        Ok(Driver::new(Arc::new(adapter), config))
    }
}
