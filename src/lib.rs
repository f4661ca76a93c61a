pub mod config;
pub mod utils;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use config::{DiskConfig, FilesystemConfig};
pub use storage::{Driver, StorageError, StorageManager, Visibility, WriteOptions};
