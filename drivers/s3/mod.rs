//! S3-compatible object storage driver / S3 兼容对象存储驱动

mod config;
mod driver;
mod factory;

pub use config::S3Config;
pub use driver::S3Adapter;
pub use factory::S3DriverFactory;
