// Actor模块 - 使用Actor模式管理并发状态
//
// 用消息传递替代Arc<Mutex<T>>，状态只在Actor内部修改

pub mod monitor_status;

pub use monitor_status::{MonitorStatusActor, MonitorStatusCommand, MonitorStatusHandle};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotifyDecision, NotifyLevel, RuleVerdict};

    #[tokio::test]
    async fn test_monitor_status_health_check() {
        let handle = MonitorStatusActor::spawn();
        assert!(handle.health_check().await, "MonitorStatusActor应该是健康的");
    }

    #[tokio::test]
    async fn test_health_check_timeout() {
        let (actor, handle) = MonitorStatusActor::new();
        drop(actor);

        assert!(!handle.health_check().await, "停止的Actor应该健康检查失败");
        // 已停止的Actor返回默认状态
        assert!(!handle.get().await.is_monitoring);
    }

    #[tokio::test]
    async fn test_status_counters() {
        let handle = MonitorStatusActor::spawn();

        handle.set_monitoring(true).await;
        handle
            .record_cycle(
                RuleVerdict {
                    valid: false,
                    failed_fields: vec![("at_desk".into(), "at_desk: false".into())],
                    passed_fields: vec![],
                },
                NotifyDecision {
                    should_notify: true,
                    should_stop: false,
                    level: NotifyLevel::Warning,
                    reason: "first check, issues found".into(),
                },
                1,
            )
            .await;
        handle.record_notification().await;
        handle.set_error(Some("分析失败".into())).await;

        let status = handle.get().await;
        assert!(status.is_monitoring);
        assert!(status.start_time.is_some());
        assert_eq!(status.snapshots_processed, 1);
        assert_eq!(status.notifications_sent, 1);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_error.as_deref(), Some("分析失败"));
        assert!(!status.last_verdict.unwrap().valid);

        handle.set_monitoring(false).await;
        let status = handle.get().await;
        assert!(!status.is_monitoring);
        assert!(status.stop_time.is_some());
    }
}
