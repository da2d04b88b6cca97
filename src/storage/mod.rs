// 存储模块 - 检测记录持久化与过期清理

pub mod cleaner;
pub mod config;
pub mod models;
pub mod repository;

pub use cleaner::StorageCleaner;
pub use config::{device_name, StorageConfig};
pub use models::*;
pub use repository::sqlite::SqliteRepository;
pub use repository::DetectionRepository;
