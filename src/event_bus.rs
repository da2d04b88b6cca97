// 事件总线 - 用于模块间解耦通信
//
// 实现发布/订阅模式,消除模块间的直接依赖关系
// 使用 tokio::sync::broadcast 实现高效的事件分发

use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::models::{NotifyDecision, NotifyLevel, RuleVerdict};

/// 监控事件枚举 - 定义所有可能的系统事件
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    // --- 监控循环 ---

    /// 监控已启动
    MonitorStarted,

    /// 监控已停止
    MonitorStopped {
        reason: String,
    },

    /// 截图完成
    SnapshotCaptured {
        path: PathBuf,
    },

    /// 分析失败（本周期跳过）
    AnalysisFailed {
        error: String,
    },

    /// 一个周期完成
    CycleCompleted {
        verdict: RuleVerdict,
        decision: NotifyDecision,
    },

    /// 通知已发送
    NotificationSent {
        level: NotifyLevel,
        text_ok: bool,
        image_ok: bool,
    },

    // --- 系统事件 ---

    /// 配置更新
    ConfigUpdated {
        fields: Vec<String>,
    },

    /// 时间调度器已启动
    SchedulerStarted,

    /// 时间调度器已停止
    SchedulerStopped,

    /// 过期记录清理完成
    RecordsCleaned {
        deleted: usize,
    },
}

/// 事件总线
///
/// 使用 broadcast channel 实现发布/订阅模式
/// 支持多个订阅者同时接收事件
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    ///
    /// # 参数
    /// - `capacity`: 事件缓冲区大小,建议 100-1000
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件
    ///
    /// 如果没有订阅者,事件会被丢弃
    pub fn publish(&self, event: MonitorEvent) {
        match self.sender.send(event) {
            Ok(receiver_count) => {
                tracing::trace!("事件已发布，订阅者数量: {}", receiver_count);
            }
            Err(_) => {
                tracing::trace!("事件已发布但无订阅者");
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    /// 获取当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_basic() {
        let bus = EventBus::new(100);
        let mut receiver = bus.subscribe();

        bus.publish(MonitorEvent::MonitorStopped {
            reason: "manual".to_string(),
        });

        match receiver.recv().await {
            Ok(MonitorEvent::MonitorStopped { reason }) => assert_eq!(reason, "manual"),
            _ => panic!("未收到预期事件"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(100);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(MonitorEvent::RecordsCleaned { deleted: 3 });

        assert!(receiver1.try_recv().is_ok());
        assert!(receiver2.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(10);
        bus.publish(MonitorEvent::SchedulerStarted);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
