// 自定义日志层 - 支持把日志实时推送给订阅者（控制台、状态面板等）

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// 日志消息
#[derive(Clone, Debug, serde::Serialize)]
pub struct LogMessage {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// 日志推送器
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogMessage>,
    enabled: AtomicBool,
}

impl LogBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            enabled: AtomicBool::new(true),
        }
    }

    /// 设置日志推送开关
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.sender.subscribe()
    }

    fn emit_log(&self, log: LogMessage) {
        if !self.is_enabled() {
            return;
        }
        // 没有订阅者时丢弃
        let _ = self.sender.send(log);
    }
}

/// 自定义日志层
pub struct BroadcastLayer {
    broadcaster: Arc<LogBroadcaster>,
}

impl BroadcastLayer {
    pub fn new(broadcaster: Arc<LogBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

impl<S: Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = metadata.level().to_string();
        let target = metadata.target().to_string();

        struct MessageVisitor {
            message: String,
        }

        impl tracing::field::Visit for MessageVisitor {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = value.to_string();
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = format!("{:?}", value);
                    // 移除首尾引号
                    if self.message.len() >= 2
                        && self.message.starts_with('"')
                        && self.message.ends_with('"')
                    {
                        self.message = self.message[1..self.message.len() - 1].to_string();
                    }
                }
            }
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();

        self.broadcaster.emit_log(LogMessage {
            timestamp,
            level,
            target,
            message: visitor.message,
        });
    }
}

/// 最近日志缓存（供控制台 logs 命令查看）
pub struct RecentLogs {
    capacity: usize,
    entries: Mutex<VecDeque<LogMessage>>,
}

impl RecentLogs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, log: LogMessage) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(log);
        }
    }

    /// 最近的 n 条，按时间顺序
    pub fn latest(&self, n: usize) -> Vec<LogMessage> {
        match self.entries.lock() {
            Ok(entries) => {
                let skip = entries.len().saturating_sub(n);
                entries.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// 在后台持续收集推送器的日志
    pub fn spawn_collector(self: Arc<Self>, broadcaster: &LogBroadcaster) -> tokio::task::JoinHandle<()> {
        let mut rx = broadcaster.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(log) => self.push(log),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// 日志目录：优先环境变量 STUDY_MONITOR_LOG_DIR，否则 <数据目录>/logs
pub fn log_dir(data_dir: &Path) -> PathBuf {
    std::env::var("STUDY_MONITOR_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("logs"))
}

/// 初始化日志系统（控制台 + 按天轮转文件 + 推送层）
pub fn init(
    data_dir: &Path,
    broadcaster: Arc<LogBroadcaster>,
) -> Result<(), SetGlobalDefaultError> {
    use tracing_subscriber::fmt::time::LocalTime;
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let log_dir = log_dir(data_dir);
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir.clone(), "monitor.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // 保持 guard 在整个程序生命周期
    std::mem::forget(guard);

    let writer = std::io::stdout.and(non_blocking);

    let timer = LocalTime::new(time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(writer)
        .with_timer(timer)
        .with_ansi(cfg!(debug_assertions))
        .finish()
        .with(BroadcastLayer::new(broadcaster));

    tracing::subscriber::set_global_default(subscriber)?;

    eprintln!("日志文件位置: {:?}", log_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_forwards_messages() {
        let broadcaster = Arc::new(LogBroadcaster::new(16));
        let mut rx = broadcaster.subscribe();

        let subscriber =
            tracing_subscriber::registry().with(BroadcastLayer::new(broadcaster.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("连续失败 {} 次", 3);
        });

        let log = rx.try_recv().unwrap();
        assert_eq!(log.level, "WARN");
        assert_eq!(log.message, "连续失败 3 次");
    }

    #[test]
    fn test_disabled_broadcaster_drops_messages() {
        let broadcaster = Arc::new(LogBroadcaster::new(16));
        broadcaster.set_enabled(false);
        let mut rx = broadcaster.subscribe();

        let subscriber =
            tracing_subscriber::registry().with(BroadcastLayer::new(broadcaster.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello");
        });

        assert!(rx.try_recv().is_err());
    }

    fn log(message: &str) -> LogMessage {
        LogMessage {
            timestamp: "2026-03-02 09:00:00.000".to_string(),
            level: "INFO".to_string(),
            target: "test".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_recent_logs_keeps_latest() {
        let recent = RecentLogs::new(3);
        for i in 0..5 {
            recent.push(log(&i.to_string()));
        }

        let latest: Vec<String> = recent.latest(10).into_iter().map(|l| l.message).collect();
        assert_eq!(latest, vec!["2", "3", "4"]);
        assert_eq!(recent.latest(1)[0].message, "4");
    }
}
