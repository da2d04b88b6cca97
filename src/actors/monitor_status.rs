// Monitor Status Actor - 使用Actor模式管理监控状态
//
// 监控循环、调度器和控制命令都只通过消息修改状态

use chrono::Local;
use tokio::sync::{mpsc, oneshot};

use crate::models::{MonitorStatus, NotifyDecision, RuleVerdict};

/// 监控状态命令
pub enum MonitorStatusCommand {
    /// 更新监控运行状态
    SetMonitoring {
        running: bool,
    },

    /// 更新调度器运行状态
    SetSchedulerRunning {
        running: bool,
    },

    /// 记录一个完成的周期
    RecordCycle {
        verdict: RuleVerdict,
        decision: NotifyDecision,
        consecutive_failures: u32,
    },

    /// 通知发送成功
    RecordNotification,

    /// 设置错误信息
    SetError {
        error: Option<String>,
    },

    /// 获取状态
    Get {
        reply: oneshot::Sender<MonitorStatus>,
    },

    /// 健康检查
    HealthCheck {
        reply: oneshot::Sender<bool>,
    },
}

/// 监控状态Actor
pub struct MonitorStatusActor {
    receiver: mpsc::Receiver<MonitorStatusCommand>,
    status: MonitorStatus,
}

impl MonitorStatusActor {
    /// 创建新的Actor
    pub fn new() -> (Self, MonitorStatusHandle) {
        let (sender, receiver) = mpsc::channel(50);
        let actor = Self {
            receiver,
            status: MonitorStatus::default(),
        };
        (actor, MonitorStatusHandle { sender })
    }

    /// 创建并在后台运行
    pub fn spawn() -> MonitorStatusHandle {
        let (actor, handle) = Self::new();
        tokio::spawn(actor.run());
        handle
    }

    /// 运行Actor
    pub async fn run(mut self) {
        tracing::info!("Monitor Status Actor 已启动");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                MonitorStatusCommand::SetMonitoring { running } => {
                    self.status.is_monitoring = running;
                    if running {
                        self.status.start_time = Some(Local::now());
                        self.status.consecutive_failures = 0;
                        self.status.last_error = None;
                    } else {
                        self.status.stop_time = Some(Local::now());
                    }
                }

                MonitorStatusCommand::SetSchedulerRunning { running } => {
                    self.status.is_scheduler_running = running;
                }

                MonitorStatusCommand::RecordCycle {
                    verdict,
                    decision,
                    consecutive_failures,
                } => {
                    self.status.snapshots_processed += 1;
                    self.status.consecutive_failures = consecutive_failures;
                    self.status.last_verdict = Some(verdict);
                    self.status.last_decision = Some(decision);
                }

                MonitorStatusCommand::RecordNotification => {
                    self.status.notifications_sent += 1;
                }

                MonitorStatusCommand::SetError { error } => {
                    self.status.last_error = error;
                }

                MonitorStatusCommand::Get { reply } => {
                    let _ = reply.send(self.status.clone());
                }

                MonitorStatusCommand::HealthCheck { reply } => {
                    let _ = reply.send(true);
                }
            }
        }

        tracing::info!("Monitor Status Actor 已停止");
    }
}

/// 监控状态Handle
#[derive(Clone)]
pub struct MonitorStatusHandle {
    sender: mpsc::Sender<MonitorStatusCommand>,
}

impl MonitorStatusHandle {
    pub async fn set_monitoring(&self, running: bool) {
        let _ = self
            .sender
            .send(MonitorStatusCommand::SetMonitoring { running })
            .await;
    }

    pub async fn set_scheduler_running(&self, running: bool) {
        let _ = self
            .sender
            .send(MonitorStatusCommand::SetSchedulerRunning { running })
            .await;
    }

    pub async fn record_cycle(
        &self,
        verdict: RuleVerdict,
        decision: NotifyDecision,
        consecutive_failures: u32,
    ) {
        let _ = self
            .sender
            .send(MonitorStatusCommand::RecordCycle {
                verdict,
                decision,
                consecutive_failures,
            })
            .await;
    }

    pub async fn record_notification(&self) {
        let _ = self.sender.send(MonitorStatusCommand::RecordNotification).await;
    }

    /// 设置错误信息
    pub async fn set_error(&self, error: Option<String>) {
        let _ = self.sender.send(MonitorStatusCommand::SetError { error }).await;
    }

    /// 获取监控状态
    pub async fn get(&self) -> MonitorStatus {
        let (reply, rx) = oneshot::channel();
        self.sender.send(MonitorStatusCommand::Get { reply }).await.ok();
        rx.await.unwrap_or_default()
    }

    /// 健康检查（1秒超时）
    pub async fn health_check(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(MonitorStatusCommand::HealthCheck { reply })
            .await
            .is_err()
        {
            return false;
        }
        matches!(
            tokio::time::timeout(std::time::Duration::from_secs(1), rx).await,
            Ok(Ok(true))
        )
    }
}
