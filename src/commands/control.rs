//! 系统控制命令
//!
//! 监控循环、时间调度器和摄像头预览的启停，状态查询与健康检查

use crate::app::MonitorApp;
use crate::camera::{CameraMode, CameraStatus};
use crate::models::MonitorStatus;
use serde::Serialize;
use tracing::{info, warn};

/// 健康检查结果
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// 状态 Actor 是否响应
    pub status_actor: bool,
    pub monitoring: bool,
    pub scheduler_running: bool,
    pub camera_mode: CameraMode,
}

/// 启动监控；已在运行时返回错误
pub async fn start_monitor(app: &MonitorApp) -> Result<(), String> {
    if app.monitor.start().await {
        Ok(())
    } else {
        Err("监控已在运行".to_string())
    }
}

/// 停止监控；未运行时返回错误
pub async fn stop_monitor(app: &MonitorApp) -> Result<(), String> {
    if app.monitor.stop().await {
        Ok(())
    } else {
        Err("监控未在运行".to_string())
    }
}

/// 获取监控状态
pub async fn get_status(app: &MonitorApp) -> Result<MonitorStatus, String> {
    Ok(app.status.get().await)
}

pub async fn start_scheduler(app: &MonitorApp) -> Result<(), String> {
    if app.scheduler.start().await {
        Ok(())
    } else {
        Err("时间调度器未启动：未启用、未配置时间段或已在运行".to_string())
    }
}

pub async fn stop_scheduler(app: &MonitorApp) -> Result<(), String> {
    if app.scheduler.stop().await {
        Ok(())
    } else {
        Err("时间调度器未在运行".to_string())
    }
}

/// 客户端请求预览
pub async fn start_preview(app: &MonitorApp, client_id: &str) -> Result<(), String> {
    let client_id = client_id.trim();
    if client_id.is_empty() {
        return Err("预览客户端 ID 不能为空".to_string());
    }
    info!("预览请求 - 客户端: {}", client_id);
    if app.camera.start_preview(client_id).await {
        Ok(())
    } else {
        Err("摄像头切换到预览模式失败".to_string())
    }
}

/// 停止预览；不指定客户端时强制停止
pub async fn stop_preview(app: &MonitorApp, client_id: Option<&str>) -> Result<(), String> {
    app.camera
        .stop_preview(client_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_camera_status(app: &MonitorApp) -> Result<CameraStatus, String> {
    Ok(app.camera.status().await)
}

pub async fn health_check(app: &MonitorApp) -> Result<HealthReport, String> {
    let status_actor = app.status.health_check().await;
    if !status_actor {
        warn!("状态 Actor 无响应");
    }
    Ok(HealthReport {
        status_actor,
        monitoring: app.monitor.is_running(),
        scheduler_running: app.scheduler.is_running().await,
        camera_mode: app.camera.current_mode().await,
    })
}

/// 测试视觉模型 API 连接
pub async fn test_analyzer(app: &MonitorApp) -> Result<(), String> {
    info!("测试分析器连接: {}", app.analyzer.name());
    app.analyzer
        .test_connection()
        .await
        .map_err(|e| format!("分析器连接失败: {}", e))
}
