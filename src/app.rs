//! 应用程序组装
//!
//! 负责把各模块连接起来：
//! - 配置、摄像头、分析器、推送、存储
//! - 监控状态 Actor 与事件总线
//! - 监控循环、时间调度器、存储清理任务

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actors::{MonitorStatusActor, MonitorStatusHandle};
use crate::analyzer::{Analyzer, VisionAnalyzer};
use crate::camera::{default_driver, CameraArbiter, CameraDriver};
use crate::config::AppConfig;
use crate::event_bus::{EventBus, MonitorEvent};
use crate::messenger::{
    MessageAdapter, Messenger, MessengerHub, TelegramAdapter, WeComAdapter,
};
use crate::models::MonitorConfigUpdate;
use crate::monitor::{DailyScheduler, MonitorService};
use crate::settings::{ConfigChange, SettingsManager};
use crate::storage::{DetectionRepository, SqliteRepository, StorageCleaner};

/// 组装应用所需的外部协作者
pub struct AppParts {
    pub settings: Arc<SettingsManager>,
    pub camera: Arc<CameraArbiter>,
    pub analyzer: Arc<dyn Analyzer>,
    pub messenger: Arc<dyn Messenger>,
    pub repo: Arc<dyn DetectionRepository>,
    pub retention_days: i64,
}

/// 应用状态
pub struct MonitorApp {
    pub settings: Arc<SettingsManager>,
    pub camera: Arc<CameraArbiter>,
    pub analyzer: Arc<dyn Analyzer>,
    pub monitor: Arc<MonitorService>,
    pub scheduler: Arc<DailyScheduler>,
    pub status: MonitorStatusHandle,
    pub events: Arc<EventBus>,
    pub repo: Arc<dyn DetectionRepository>,
    pub cleaner: Arc<StorageCleaner>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorApp {
    /// 按进程配置创建全部真实组件
    pub async fn initialize(config: &AppConfig) -> Result<Self> {
        info!("初始化学习监控...");

        tokio::fs::create_dir_all(&config.storage.captures_dir)
            .await
            .with_context(|| format!("无法创建截图目录: {:?}", config.storage.captures_dir))?;

        let settings = Arc::new(SettingsManager::new(config.monitor_config_path.clone()).await?);
        info!("监控配置: {:?}", settings.path());

        let driver: Arc<dyn CameraDriver> = Arc::from(default_driver(config.camera_device.clone()));
        let camera = Arc::new(CameraArbiter::new(driver, config.camera.clone()));

        if config.vision.api_key.is_none() {
            warn!("未配置 KIMI_API_KEY，图片分析将失败");
        }
        let analyzer = Arc::new(VisionAnalyzer::new(config.vision.clone())?);

        let mut adapters: Vec<Box<dyn MessageAdapter>> = Vec::new();
        if let Some(wecom) = &config.wecom {
            adapters.push(Box::new(WeComAdapter::new(wecom.clone())?));
        }
        if let Some(telegram) = &config.telegram {
            adapters.push(Box::new(TelegramAdapter::new(telegram.clone())?));
        }
        let messenger = Arc::new(MessengerHub::new(adapters));

        let repo = Arc::new(
            SqliteRepository::new(&config.storage.db_path.to_string_lossy())
                .await
                .context("初始化检测记录数据库失败")?,
        );

        Ok(Self::from_parts(AppParts {
            settings,
            camera,
            analyzer,
            messenger,
            repo,
            retention_days: config.storage.retention_days,
        }))
    }

    /// 用给定的组件组装（测试时传入替身）
    pub fn from_parts(parts: AppParts) -> Self {
        let status = MonitorStatusActor::spawn();
        let events = Arc::new(EventBus::new(1000));

        let monitor = MonitorService::new(
            parts.settings.clone(),
            parts.camera.clone(),
            parts.analyzer.clone(),
            parts.messenger,
            parts.repo.clone(),
            status.clone(),
            events.clone(),
        );
        let scheduler = Arc::new(DailyScheduler::new(
            monitor.clone(),
            parts.settings.clone(),
            status.clone(),
            events.clone(),
        ));
        let cleaner = Arc::new(StorageCleaner::new(
            parts.repo.clone(),
            parts.retention_days,
            events.clone(),
        ));

        Self {
            settings: parts.settings,
            camera: parts.camera,
            analyzer: parts.analyzer,
            monitor,
            scheduler,
            status,
            events,
            repo: parts.repo,
            cleaner,
            cleanup_task: Mutex::new(None),
        }
    }

    /// 启动后台任务：存储清理，以及已启用的时间调度
    pub async fn start_background(&self) {
        let mut task = self.cleanup_task.lock().await;
        if task.is_none() {
            *task = Some(self.cleaner.clone().start_cleanup_task());
        }
        drop(task);

        if self.settings.get().await.config.enable_time_scheduler {
            self.scheduler.start().await;
        }
    }

    /// 更新监控配置；时间段相关字段变化时重启调度器
    pub async fn update_config(&self, update: MonitorConfigUpdate) -> Result<ConfigChange> {
        let change = self.settings.update(update).await?;

        self.events.publish(MonitorEvent::ConfigUpdated {
            fields: change.fields.iter().map(|f| f.to_string()).collect(),
        });

        if change.scheduler_changed {
            info!("时间调度配置已变化，重启调度器");
            self.scheduler.restart().await;
        }
        Ok(change)
    }

    /// 关闭：调度器 → 监控循环 → 摄像头
    pub async fn shutdown(&self) {
        info!("正在关闭...");
        self.scheduler.stop().await;
        self.monitor.stop().await;
        self.camera.shutdown().await;
        if let Some(task) = self.cleanup_task.lock().await.take() {
            task.abort();
        }
        info!("已关闭");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::camera::testing::{fast_settings, FakeDriver};
    use crate::models::AnalysisResult;
    use crate::monitor::testing::{FakeAnalyzer, FakeMessenger, MemoryRepository};
    use std::path::Path;

    /// 使用替身组件的应用
    pub async fn test_app(dir: &Path) -> MonitorApp {
        let settings = Arc::new(
            SettingsManager::new(dir.join("monitor_config.json"))
                .await
                .unwrap(),
        );
        let camera = Arc::new(CameraArbiter::new(
            Arc::new(FakeDriver::default()),
            fast_settings(dir.join("captures")),
        ));
        MonitorApp::from_parts(AppParts {
            settings,
            camera,
            analyzer: Arc::new(FakeAnalyzer::returning(
                AnalysisResult::new().with("at_desk", true),
            )),
            messenger: Arc::new(FakeMessenger::default()),
            repo: Arc::new(MemoryRepository::default()),
            retention_days: 30,
        })
    }
}
