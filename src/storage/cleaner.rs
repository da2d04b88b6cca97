// 存储清理模块 - 自动清理过期检测记录和截图

use super::{local_now, DetectionRepository};
use crate::event_bus::{EventBus, MonitorEvent};
use anyhow::Result;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

/// 最大保留天数
const MAX_RETENTION_DAYS: i64 = 365;

/// 存储清理器
pub struct StorageCleaner {
    repo: Arc<dyn DetectionRepository>,
    /// 数据保留天数（使用RwLock实现内部可变性）
    retention_days: RwLock<i64>,
    check_interval: Duration,
    events: Arc<EventBus>,
}

impl StorageCleaner {
    pub fn new(repo: Arc<dyn DetectionRepository>, retention_days: i64, events: Arc<EventBus>) -> Self {
        Self {
            repo,
            retention_days: RwLock::new(retention_days.clamp(1, MAX_RETENTION_DAYS)),
            check_interval: Duration::from_secs(3600),
            events,
        }
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// 设置保留天数
    pub async fn set_retention_days(&self, days: i64) -> Result<()> {
        if days < 1 {
            return Err(anyhow::anyhow!("保留天数必须至少为1天"));
        }
        if days > MAX_RETENTION_DAYS {
            return Err(anyhow::anyhow!("保留天数不能超过{}天", MAX_RETENTION_DAYS));
        }

        *self.retention_days.write().await = days;
        info!("数据保留天数已更新为: {}天", days);
        Ok(())
    }

    pub async fn get_retention_days(&self) -> i64 {
        *self.retention_days.read().await
    }

    /// 启动自动清理任务
    pub fn start_cleanup_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.check_interval);
            info!("存储清理任务已启动，间隔 {:?}", self.check_interval);

            loop {
                ticker.tick().await;

                if let Err(e) = self.perform_cleanup().await {
                    error!("清理任务执行失败: {}", e);
                }
            }
        })
    }

    /// 执行清理操作，返回删除的记录数
    pub async fn perform_cleanup(&self) -> Result<usize> {
        let retention_days = self.get_retention_days().await;
        let cutoff = local_now() - ChronoDuration::days(retention_days);
        info!("开始清理 {} 之前的数据", cutoff.format("%Y-%m-%d"));

        let paths = self.repo.delete_before(cutoff).await?;

        let mut failed = 0usize;
        for path in &paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("删除截图失败 {}: {}", path, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            error!("清理完成，但有 {} 个文件删除失败", failed);
        }

        info!("清理完成，删除了 {} 条记录", paths.len());
        self.events.publish(MonitorEvent::RecordsCleaned {
            deleted: paths.len(),
        });
        Ok(paths.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisResult;
    use crate::storage::{NewDetection, SqliteRepository};
    use tempfile::tempdir;

    async fn cleaner(dir: &std::path::Path) -> (Arc<SqliteRepository>, StorageCleaner, Arc<EventBus>) {
        let repo = Arc::new(
            SqliteRepository::new(dir.join("records.db").to_str().unwrap())
                .await
                .unwrap(),
        );
        let events = Arc::new(EventBus::new(16));
        let cleaner = StorageCleaner::new(repo.clone(), 30, events.clone());
        (repo, cleaner, events)
    }

    #[tokio::test]
    async fn test_retention_bounds() {
        let dir = tempdir().unwrap();
        let (_, cleaner, _) = cleaner(dir.path()).await;

        assert_eq!(cleaner.get_retention_days().await, 30);
        assert!(cleaner.set_retention_days(0).await.is_err());
        assert!(cleaner.set_retention_days(366).await.is_err());
        cleaner.set_retention_days(7).await.unwrap();
        assert_eq!(cleaner.get_retention_days().await, 7);
    }

    #[tokio::test]
    async fn test_recent_records_survive_cleanup() {
        let dir = tempdir().unwrap();
        let (repo, cleaner, events) = cleaner(dir.path()).await;
        let mut rx = events.subscribe();

        let image = dir.path().join("keep.jpg");
        std::fs::write(&image, b"jpeg").unwrap();
        repo.save(&NewDetection {
            image_path: image.to_string_lossy().into_owned(),
            is_valid: true,
            issues: vec![],
            should_notify: false,
            analysis: AnalysisResult::new(),
        })
        .await
        .unwrap();

        assert_eq!(cleaner.perform_cleanup().await.unwrap(), 0);
        assert!(image.exists());
        assert!(matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::RecordsCleaned { deleted: 0 }
        ));
    }
}
