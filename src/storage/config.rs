// 存储配置定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 检测记录数据库路径
    pub db_path: PathBuf,
    /// 截图目录
    pub captures_dir: PathBuf,
    /// 数据保留天数
    pub retention_days: i64,
    /// 清理检查间隔（小时）
    pub cleanup_interval_hours: u64,
}

impl StorageConfig {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            db_path: data_dir.join("detection_records.db"),
            captures_dir: data_dir.join("captures"),
            retention_days: 30,
            cleanup_interval_hours: 1,
        }
    }
}

/// 当前设备名（写入每条检测记录）
pub fn device_name() -> String {
    whoami::devicename()
}
