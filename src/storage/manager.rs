use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::driver::Driver;
use super::error::StorageError;
use crate::config::{DiskConfig, FilesystemConfig};

pub type DriverBox = Arc<Driver>;

type Result<T> = std::result::Result<T, StorageError>;

/// Custom driver creator registered through `extend` / 通过 extend 注册的自定义驱动构造器
pub type Creator = Arc<dyn Fn(&DiskConfig) -> Result<Driver> + Send + Sync>;

/// Driver factory trait / 驱动工厂 trait
pub trait DriverFactory: Send + Sync {
    /// Backend kind handled by this factory / 驱动类型名称
    fn driver_type(&self) -> &str;

    /// 创建驱动实例
    fn create_driver(&self, config: &DiskConfig) -> Result<Driver>;
}

/// Storage manager (resolves and caches disks by name) / 存储管理器
#[derive(Clone)]
pub struct StorageManager {
    config: Arc<RwLock<FilesystemConfig>>,
    /// Disk name -> construct-once cell / 磁盘名称 -> 只构建一次的单元
    disks: Arc<RwLock<HashMap<String, Arc<OnceCell<DriverBox>>>>>,
    factories: Arc<RwLock<HashMap<String, Arc<dyn DriverFactory>>>>,
    /// Custom creators, checked before factories / 自定义构造器，优先于工厂
    creators: Arc<RwLock<HashMap<String, Creator>>>,
}

impl StorageManager {
    pub fn new(config: FilesystemConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            disks: Arc::new(RwLock::new(HashMap::new())),
            factories: Arc::new(RwLock::new(HashMap::new())),
            creators: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Manager with local, memory, ftp, sftp and s3 registered / 注册全部内置驱动
    pub fn with_builtin_drivers(config: FilesystemConfig) -> Self {
        let manager = Self::new(config);
        crate::drivers::register_all(&manager);
        manager
    }

    /// Register driver factory / 注册驱动工厂
    pub fn register_factory(&self, factory: Box<dyn DriverFactory>) {
        let driver_type = factory.driver_type().to_string();
        self.factories
            .write()
            .insert(driver_type.clone(), Arc::from(factory));
        tracing::info!("Driver factory registered: {}", driver_type);
    }

    /// Register a custom creator for a backend kind / 为后端类型注册自定义构造器
    ///
    /// The creator must not resolve the disk it is building.
    pub fn extend<F>(&self, kind: &str, creator: F) -> &Self
    where
        F: Fn(&DiskConfig) -> Result<Driver> + Send + Sync + 'static,
    {
        self.creators.write().insert(kind.to_string(), Arc::new(creator));
        tracing::info!("Custom driver registered: {}", kind);
        self
    }

    /// Get a disk by name, or the default disk / 按名称获取磁盘（默认磁盘）
    pub fn disk(&self, name: Option<&str>) -> Result<DriverBox> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_driver(),
        };
        self.get(&name)
    }

    /// Alias of `disk` / `disk` 的别名
    pub fn drive(&self, name: Option<&str>) -> Result<DriverBox> {
        self.disk(name)
    }

    /// Get the default cloud disk / 获取默认云存储磁盘
    pub fn cloud(&self) -> Result<DriverBox> {
        let name = self.default_cloud_driver();
        self.get(&name)
    }

    /// Build an uncached on-demand disk / 构建不缓存的临时磁盘
    pub fn build(&self, config: DiskConfig) -> Result<DriverBox> {
        let config = if config.name.is_empty() { config.named("ondemand") } else { config };
        self.create(config).map(Arc::new)
    }

    /// Inject a driver under a name / 以指定名称注入驱动
    pub fn set(&self, name: &str, driver: Driver) -> &Self {
        self.disks
            .write()
            .insert(name.to_string(), Arc::new(OnceCell::with_value(Arc::new(driver))));
        self
    }

    /// Drop cached disks, the next access rebuilds them / 清除磁盘缓存
    pub fn forget_disk<I>(&self, names: I) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut disks = self.disks.write();
        for name in names {
            if disks.remove(name.as_ref()).is_some() {
                tracing::debug!("Disk cache cleared: {}", name.as_ref());
            }
        }
        self
    }

    /// Forget a disk (the default when `None`) / 清除指定磁盘（默认磁盘）
    pub fn purge(&self, name: Option<&str>) {
        let name = name.map(str::to_string).unwrap_or_else(|| self.default_driver());
        self.forget_disk([name]);
    }

    pub fn default_driver(&self) -> String {
        self.config.read().default.clone()
    }

    pub fn default_cloud_driver(&self) -> String {
        self.config
            .read()
            .cloud
            .clone()
            .unwrap_or_else(|| "s3".to_string())
    }

    /// Names of disks constructed so far / 已构建的磁盘名称
    pub fn cached_disks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .disks
            .read()
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Registered backend kinds, custom and built-in / 已注册的后端类型
    pub fn driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        for kind in self.creators.read().keys() {
            if !types.contains(kind) {
                types.push(kind.clone());
            }
        }
        types.sort();
        types
    }

    fn get(&self, name: &str) -> Result<DriverBox> {
        let cached = self.disks.read().get(name).cloned();
        let cell = match cached {
            Some(cell) => cell,
            None => {
                // Unknown names never get a cell
                self.disk_config(name)?;
                self.disks.write().entry(name.to_string()).or_default().clone()
            }
        };
        // Concurrent first accesses to one name wait on the same cell
        match cell.get_or_try_init(|| self.resolve(name).map(Arc::new)) {
            Ok(driver) => Ok(driver.clone()),
            Err(e) => {
                let mut disks = self.disks.write();
                if disks.get(name).is_some_and(|c| Arc::ptr_eq(c, &cell) && c.get().is_none()) {
                    disks.remove(name);
                }
                Err(e)
            }
        }
    }

    fn disk_config(&self, name: &str) -> Result<DiskConfig> {
        self.config
            .read()
            .disk(name)
            .filter(|config| !config.kind.is_empty())
            .ok_or_else(|| StorageError::ConfigurationNotFound(name.to_string()))
    }

    fn resolve(&self, name: &str) -> Result<Driver> {
        let config = self.disk_config(name)?;
        let kind = config.kind.clone();
        let driver = self.create(config)?;
        tracing::info!("Disk resolved: {} ({})", name, kind);
        Ok(driver)
    }

    fn create(&self, config: DiskConfig) -> Result<Driver> {
        let creator = self.creators.read().get(&config.kind).cloned();
        if let Some(creator) = creator {
            return creator(&config);
        }

        let factory = self.factories.read().get(&config.kind).cloned();
        match factory {
            Some(factory) => factory.create_driver(&config).map_err(|e| {
                tracing::error!("Driver creation failed: {} ({}) - {}", config.name, config.kind, e);
                e
            }),
            None => Err(StorageError::UnsupportedDriver(config.kind)),
        }
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::with_builtin_drivers(FilesystemConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::{MemoryAdapter, MemoryDriverFactory};
    use crate::storage::WriteOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_config() -> FilesystemConfig {
        let mut config = FilesystemConfig::default();
        config.default = "scratch".to_string();
        config
            .with_disk("scratch", DiskConfig::new("memory", ""))
            .with_disk("other", DiskConfig::new("memory", ""))
            .with_disk("custom", DiskConfig::new("counting", ""))
            .with_disk("broken", DiskConfig::new("", ""))
            .with_disk("exotic", DiskConfig::new("gopher", ""))
    }

    fn manager() -> StorageManager {
        let manager = StorageManager::new(memory_config());
        manager.register_factory(Box::new(MemoryDriverFactory));
        manager
    }

    #[test]
    fn test_same_name_same_instance() {
        let manager = manager();
        let a = manager.disk(Some("scratch")).unwrap();
        let b = manager.disk(None).unwrap();
        let c = manager.drive(Some("scratch")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(a.name(), "scratch");

        let other = manager.disk(Some("other")).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(manager.cached_disks(), vec!["other", "scratch"]);
    }

    #[test]
    fn test_construct_once_under_contention() {
        let manager = manager();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        manager.extend("counting", move |config| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Driver::new(Arc::new(MemoryAdapter::new()), config.clone()))
        });

        let drivers: Vec<DriverBox> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| manager.disk(Some("custom")).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(drivers.iter().all(|d| Arc::ptr_eq(d, &drivers[0])));
    }

    #[test]
    fn test_custom_creator_wins_over_builtin() {
        let manager = manager();
        manager.extend("memory", |config| {
            Ok(Driver::new(Arc::new(MemoryAdapter::new()), config.clone().throw(true)))
        });
        let disk = manager.disk(Some("scratch")).unwrap();
        assert!(disk.throws());
        assert_eq!(manager.driver_types(), vec!["memory"]);
    }

    #[test]
    fn test_configuration_errors() {
        let manager = manager();
        assert!(matches!(
            manager.disk(Some("nope")),
            Err(StorageError::ConfigurationNotFound(name)) if name == "nope"
        ));
        assert!(matches!(
            manager.disk(Some("broken")),
            Err(StorageError::ConfigurationNotFound(_))
        ));
        assert!(matches!(
            manager.disk(Some("exotic")),
            Err(StorageError::UnsupportedDriver(kind)) if kind == "gopher"
        ));
        // Failed construction leaves nothing cached
        assert!(manager.cached_disks().is_empty());
    }

    #[test]
    fn test_failed_lookups_leave_no_cells() {
        let manager = manager();
        for i in 0..100 {
            assert!(manager.disk(Some(&format!("nope-{}", i))).is_err());
        }
        assert!(manager.disk(Some("exotic")).is_err());
        assert!(manager.disk(Some("broken")).is_err());
        assert!(manager.disks.read().is_empty());

        manager.disk(Some("scratch")).unwrap();
        assert_eq!(manager.disks.read().len(), 1);
    }

    #[test]
    fn test_failed_construction_is_retried() {
        let manager = manager();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        manager.extend("counting", move |config| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StorageError::invalid_configuration(&config.name, "first try"));
            }
            Ok(Driver::new(Arc::new(MemoryAdapter::new()), config.clone()))
        });
        assert!(manager.disk(Some("custom")).is_err());
        assert!(manager.disk(Some("custom")).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_forget_set_and_build() {
        let manager = manager();
        let first = manager.disk(Some("scratch")).unwrap();
        first.put("a.txt", "x", WriteOptions::new()).unwrap();

        manager.forget_disk(["scratch"]);
        let second = manager.disk(Some("scratch")).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.file_missing("a.txt"));

        let injected = Driver::new(Arc::new(MemoryAdapter::new()), DiskConfig::new("memory", "").named("fake"));
        manager.set("scratch", injected);
        assert_eq!(manager.disk(None).unwrap().name(), "fake");

        let a = manager.build(DiskConfig::new("memory", "")).unwrap();
        let b = manager.build(DiskConfig::new("memory", "")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "ondemand");
    }

    #[test]
    fn test_cloud_default() {
        let manager = manager();
        assert_eq!(manager.default_cloud_driver(), "s3");
        assert!(matches!(manager.cloud(), Err(StorageError::ConfigurationNotFound(_))));

        manager.config.write().cloud = Some("other".to_string());
        assert_eq!(manager.cloud().unwrap().name(), "other");
    }
}
