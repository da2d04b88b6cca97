// 监控循环 - 截图 → 分析 → 规则检查 → 节流判定 → 存储/通知
//
// 状态：空闲 → (可选) 预览 → 运行 → 空闲
// 停止由两处发起：外部控制（等待工作任务退出，最多 5 秒）
// 以及工作任务自身（连续失败达到限制，不能等待自己）

pub mod rules;
pub mod scheduler;
pub mod throttle;

pub use rules::RuleSet;
pub use scheduler::DailyScheduler;
pub use throttle::{NotificationThrottle, ThrottlePolicy};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::actors::MonitorStatusHandle;
use crate::analyzer::Analyzer;
use crate::camera::{CameraArbiter, CameraMode};
use crate::event_bus::{EventBus, MonitorEvent};
use crate::messenger::{build_notification_text, Messenger};
use crate::models::{AnalysisResult, NotifyLevel};
use crate::settings::{ConfigSnapshot, SettingsManager};
use crate::storage::{DetectionRepository, NewDetection};

/// 监控循环占用预览时使用的客户端 ID
pub const PREVIEW_CLIENT: &str = "monitor";

/// 周期内出现意外错误后的退避时间
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// 外部停止时等待工作任务退出的上限
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 调度器和控制命令看到的监控接口
#[async_trait]
pub trait MonitorControl: Send + Sync {
    fn is_running(&self) -> bool;

    /// 已在运行时返回 false
    async fn start(&self) -> bool;

    /// 未运行时返回 false
    async fn stop(&self) -> bool;
}

/// 停止请求的来源
enum StopOrigin<'a> {
    External,
    /// 工作任务自身，携带本次运行的取消通道
    Worker(&'a mut watch::Receiver<bool>),
}

enum CycleOutcome {
    Continue,
    Stopped,
}

struct Run {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// 监控服务
pub struct MonitorService {
    this: Weak<MonitorService>,
    settings: Arc<SettingsManager>,
    camera: Arc<CameraArbiter>,
    analyzer: Arc<dyn Analyzer>,
    messenger: Arc<dyn Messenger>,
    repo: Arc<dyn DetectionRepository>,
    throttle: Mutex<NotificationThrottle>,
    running: AtomicBool,
    run: Mutex<Option<Run>>,
    status: MonitorStatusHandle,
    events: Arc<EventBus>,
}

impl MonitorService {
    pub fn new(
        settings: Arc<SettingsManager>,
        camera: Arc<CameraArbiter>,
        analyzer: Arc<dyn Analyzer>,
        messenger: Arc<dyn Messenger>,
        repo: Arc<dyn DetectionRepository>,
        status: MonitorStatusHandle,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        info!("监控服务初始化 - 分析器: {}", analyzer.name());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            settings,
            camera,
            analyzer,
            messenger,
            repo,
            throttle: Mutex::new(NotificationThrottle::new()),
            running: AtomicBool::new(false),
            run: Mutex::new(None),
            status,
            events,
        })
    }

    pub fn camera(&self) -> &Arc<CameraArbiter> {
        &self.camera
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 启动监控；已在运行时不做任何事
    pub async fn start(&self) -> bool {
        let mut slot = self.run.lock().await;
        if self.is_running() {
            warn!("监控已在运行");
            return false;
        }
        let Some(this) = self.this.upgrade() else {
            return false;
        };

        self.throttle.lock().await.reset();
        self.status.set_monitoring(true).await;
        self.events.publish(MonitorEvent::MonitorStarted);

        let (cancel, cancel_rx) = watch::channel(false);
        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(this.run_worker(cancel_rx));
        *slot = Some(Run { cancel, handle });
        info!("监控已启动");
        true
    }

    /// 外部停止：等待工作任务退出后释放摄像头
    pub async fn stop(&self) -> bool {
        self.stop_inner(StopOrigin::External, "manual").await
    }

    async fn stop_inner(&self, origin: StopOrigin<'_>, reason: &str) -> bool {
        let external = matches!(origin, StopOrigin::External);
        let mut slot = match origin {
            StopOrigin::External => self.run.lock().await,
            // 外部停止正在进行时它已持有锁并发出取消，直接让位
            StopOrigin::Worker(cancel) => tokio::select! {
                slot = self.run.lock() => slot,
                _ = cancel.changed() => return false,
            },
        };

        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!("停止监控 - 原因: {}", reason);

        if let Some(mut run) = slot.take() {
            let _ = run.cancel.send(true);
            if external
                && tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut run.handle)
                    .await
                    .is_err()
            {
                warn!("等待监控循环退出超时，强制终止");
                run.handle.abort();
            }
        }

        // 先结束预览会话再释放摄像头
        self.camera.shutdown().await;
        drop(slot);

        self.status.set_monitoring(false).await;
        self.events.publish(MonitorEvent::MonitorStopped {
            reason: reason.to_string(),
        });
        info!("监控已停止");
        true
    }

    async fn run_worker(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        info!("监控循环已启动");

        let snapshot = self.settings.get().await;
        let preview = snapshot.config.preview_for();
        if snapshot.config.enable_preview && !preview.is_zero() {
            self.preview_phase(preview, &mut cancel).await;
        }

        while self.is_running() && !*cancel.borrow() {
            // 每个周期读取一次配置快照
            let snapshot = self.settings.get().await;

            let cycle = AssertUnwindSafe(self.run_cycle(&snapshot, &mut cancel))
                .catch_unwind()
                .await;
            let pause = match cycle {
                Ok(CycleOutcome::Continue) => snapshot.config.capture_every(),
                Ok(CycleOutcome::Stopped) => break,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("监控周期异常: {}", message);
                    self.status
                        .set_error(Some(format!("监控周期异常: {}", message)))
                        .await;
                    ERROR_BACKOFF
                }
            };

            if !sleep_or_cancel(pause, &mut cancel).await {
                break;
            }
        }

        info!("监控循环已退出");
    }

    async fn preview_phase(&self, duration: Duration, cancel: &mut watch::Receiver<bool>) {
        info!("预览阶段开始，持续 {} 秒", duration.as_secs());
        if !self.camera.start_preview(PREVIEW_CLIENT).await {
            warn!("预览启动失败，直接进入截图模式");
            return;
        }

        sleep_or_cancel(duration, cancel).await;

        if self.is_running() {
            if let Err(e) = self.camera.stop_preview(Some(PREVIEW_CLIENT)).await {
                warn!("结束预览失败: {}", e);
            }
            info!("预览阶段结束，开始截图");
        }
    }

    async fn run_cycle(
        &self,
        snapshot: &ConfigSnapshot,
        cancel: &mut watch::Receiver<bool>,
    ) -> CycleOutcome {
        // 硬件故障只跳过本周期
        if !self.camera.switch_to(CameraMode::Capture).await {
            warn!("摄像头无法切换到截图模式，等待下一周期");
            return CycleOutcome::Continue;
        }

        let Some(path) = self.camera.capture().await else {
            warn!("截图失败，等待下一周期");
            return CycleOutcome::Continue;
        };
        self.events
            .publish(MonitorEvent::SnapshotCaptured { path: path.clone() });

        if self.process_snapshot(snapshot, &path, cancel).await {
            CycleOutcome::Stopped
        } else {
            CycleOutcome::Continue
        }
    }

    /// 处理一张截图，返回本周期是否停止了监控
    async fn process_snapshot(
        &self,
        snapshot: &ConfigSnapshot,
        path: &Path,
        cancel: &mut watch::Receiver<bool>,
    ) -> bool {
        // 分析失败不影响节流状态
        let analysis = match self.analyzer.analyze(path).await {
            Ok(analysis) => analysis,
            Err(e) => {
                error!("图片分析失败: {}", e);
                self.status.set_error(Some(format!("分析失败: {}", e))).await;
                self.events.publish(MonitorEvent::AnalysisFailed {
                    error: e.to_string(),
                });
                return false;
            }
        };

        let verdict = snapshot.rules.evaluate(&analysis);
        let (decision, failures) = {
            let mut throttle = self.throttle.lock().await;
            let decision = throttle.decide(verdict.valid, &snapshot.throttle_policy());
            (decision, throttle.consecutive_failures())
        };
        info!(
            "检查结果: valid={}, 连续失败={}, 通知={}, 原因={}",
            verdict.valid, failures, decision.should_notify, decision.reason
        );

        self.status
            .record_cycle(verdict.clone(), decision.clone(), failures)
            .await;

        // 不论是否通知都记录
        let record = NewDetection {
            image_path: path.to_string_lossy().into_owned(),
            is_valid: verdict.valid,
            issues: verdict.issues(),
            should_notify: decision.should_notify,
            analysis: analysis.clone(),
        };
        if let Err(e) = self.repo.save(&record).await {
            error!("保存检测记录失败: {}", e);
        }

        if decision.should_notify {
            self.notify(failures, &analysis, path, decision.level).await;
        }

        let should_stop = decision.should_stop;
        self.events
            .publish(MonitorEvent::CycleCompleted { verdict, decision });

        if should_stop {
            self.stop_inner(StopOrigin::Worker(cancel), "consecutive_fail_limit")
                .await;
            return true;
        }
        false
    }

    /// 文本和图片分别发送，互不影响
    async fn notify(
        &self,
        failures: u32,
        analysis: &AnalysisResult,
        path: &Path,
        level: NotifyLevel,
    ) {
        let text = build_notification_text(failures, analysis, Local::now());
        let text_ok = self.messenger.send(&text, level).await;
        let image_ok = self.messenger.send_image(path, level).await;

        if text_ok || image_ok {
            self.status.record_notification().await;
        } else {
            warn!("通知发送失败（文本和图片均失败）");
        }
        self.events.publish(MonitorEvent::NotificationSent {
            level,
            text_ok,
            image_ok,
        });
    }
}

#[async_trait]
impl MonitorControl for MonitorService {
    fn is_running(&self) -> bool {
        MonitorService::is_running(self)
    }

    async fn start(&self) -> bool {
        MonitorService::start(self).await
    }

    async fn stop(&self) -> bool {
        MonitorService::stop(self).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知错误".to_string()
    }
}

/// 可中断的等待；被取消时返回 false
async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.changed() => false,
    }
}
