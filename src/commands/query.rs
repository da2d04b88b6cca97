//! 数据查询命令

use crate::app::MonitorApp;
use crate::storage::{DetectionRecord, StorageStatus};

/// 获取今天的检测记录（最新的在前）
pub async fn get_today_records(app: &MonitorApp) -> Result<Vec<DetectionRecord>, String> {
    app.repo.get_today().await.map_err(|e| e.to_string())
}

pub async fn get_storage_status(app: &MonitorApp) -> Result<StorageStatus, String> {
    app.repo.get_status().await.map_err(|e| e.to_string())
}

/// 设置记录保留天数
pub async fn set_retention_days(app: &MonitorApp, days: i64) -> Result<(), String> {
    app.cleaner
        .set_retention_days(days)
        .await
        .map_err(|e| e.to_string())
}

/// 立即清理过期记录，返回删除条数
pub async fn cleanup_records(app: &MonitorApp) -> Result<usize, String> {
    app.cleaner.perform_cleanup().await.map_err(|e| e.to_string())
}
