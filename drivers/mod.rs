// Driver package / 驱动包
pub mod local;
pub mod memory;
pub mod ftp;
pub mod sftp;
pub mod s3;

use crate::storage::StorageManager;

/// Register all built-in drivers to StorageManager / 注册所有内置驱动
pub fn register_all(manager: &StorageManager) {
    // Register local driver (using LocalDriverFactory from storage module) / 注册本地驱动
    manager.register_factory(Box::new(crate::storage::LocalDriverFactory));
    // Register in-memory driver / 注册内存驱动
    manager.register_factory(Box::new(memory::MemoryDriverFactory));
    // Register FTP driver / 注册FTP驱动
    manager.register_factory(Box::new(ftp::FtpDriverFactory));
    // Register SFTP driver / 注册 SFTP 驱动
    manager.register_factory(Box::new(sftp::SftpDriverFactory));
    // Register S3 driver / 注册S3对象存储驱动
    manager.register_factory(Box::new(s3::S3DriverFactory));
}
