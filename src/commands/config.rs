//! 配置管理命令

use crate::app::MonitorApp;
use crate::models::{MonitorConfig, MonitorConfigUpdate};
use tracing::error;

/// 获取当前监控配置
pub async fn get_config(app: &MonitorApp) -> Result<MonitorConfig, String> {
    Ok(app.settings.get().await.config.clone())
}

/// 部分更新监控配置（JSON 对象，只包含要修改的字段）
pub async fn update_config(app: &MonitorApp, json: &str) -> Result<MonitorConfig, String> {
    let update: MonitorConfigUpdate =
        serde_json::from_str(json).map_err(|e| format!("配置格式错误: {}", e))?;

    match app.update_config(update).await {
        Ok(change) => Ok(change.snapshot.config.clone()),
        Err(e) => {
            error!("更新配置失败: {}", e);
            Err(e.to_string())
        }
    }
}
