// 时间调度器 - 每分钟检查一次，在每日时间段边界自动启动/停止监控
//
// 启动：未运行 + 在 [开始, 停止) 时间段内 + 今天还没自动启动过
//       即使因连续失败停机，当天也不会再次自动启动
// 停止：正在运行 + 上次检查还在停止时间之前，本次已到达或超过停止时间

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::MonitorControl;
use crate::actors::MonitorStatusHandle;
use crate::event_bus::{EventBus, MonitorEvent};
use crate::models::TimeOfDay;
use crate::settings::SettingsManager;

/// 一次检查的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleAction {
    pub start: bool,
    pub stop: bool,
}

/// 调度状态（纯逻辑，不涉及时钟和线程）
#[derive(Debug, Clone)]
pub struct ScheduleTracker {
    start_minute: u32,
    stop_minute: u32,
    last_date: Option<NaiveDate>,
    last_minute: Option<u32>,
    auto_started_on: Option<NaiveDate>,
}

impl ScheduleTracker {
    pub fn new(start: TimeOfDay, stop: TimeOfDay) -> Self {
        Self {
            start_minute: start.minutes_since_midnight(),
            stop_minute: stop.minutes_since_midnight(),
            last_date: None,
            last_minute: None,
            auto_started_on: None,
        }
    }

    /// 处理一次检查
    pub fn tick(&mut self, now: NaiveDateTime, is_running: bool) -> ScheduleAction {
        let today = now.date();
        let minute = now.hour() * 60 + now.minute();

        if self.last_date != Some(today) {
            info!("新的一天: {}, 重置调度状态", today);
            self.last_date = Some(today);
            self.last_minute = None;
            self.auto_started_on = None;
        }

        let in_window = self.start_minute <= minute && minute < self.stop_minute;

        let start = !is_running && in_window && self.auto_started_on != Some(today);
        if start {
            self.auto_started_on = Some(today);
        }

        let stop = is_running
            && matches!(self.last_minute, Some(last) if last < self.stop_minute)
            && minute >= self.stop_minute;

        self.last_minute = Some(minute);
        ScheduleAction { start, stop }
    }
}

struct Run {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// 停止时等待工作任务退出的上限
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 每日调度器
pub struct DailyScheduler {
    monitor: Arc<dyn MonitorControl>,
    settings: Arc<SettingsManager>,
    status: MonitorStatusHandle,
    events: Arc<EventBus>,
    tick_interval: Duration,
    clock: fn() -> NaiveDateTime,
    run: Mutex<Option<Run>>,
}

fn local_clock() -> NaiveDateTime {
    Local::now().naive_local()
}

impl DailyScheduler {
    pub fn new(
        monitor: Arc<dyn MonitorControl>,
        settings: Arc<SettingsManager>,
        status: MonitorStatusHandle,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            monitor,
            settings,
            status,
            events,
            tick_interval: Duration::from_secs(60),
            clock: local_clock,
            run: Mutex::new(None),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.is_some()
    }

    /// 启动调度器；未启用或时间未配置时返回 false
    pub async fn start(&self) -> bool {
        let snapshot = self.settings.get().await;
        let config = &snapshot.config;

        if !config.enable_time_scheduler {
            info!("时间调度未启用");
            return false;
        }
        let (Some(start), Some(stop)) = (config.auto_start_time, config.auto_stop_time) else {
            warn!("时间调度未配置开始/停止时间");
            return false;
        };

        let mut run = self.run.lock().await;
        if run.is_some() {
            warn!("时间调度器已在运行");
            return false;
        }

        info!("启动时间调度器 - 开始: {}, 停止: {}", start, stop);
        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(
            self.monitor.clone(),
            ScheduleTracker::new(start, stop),
            cancel_rx,
            self.tick_interval,
            self.clock,
        ));
        *run = Some(Run { cancel, handle });
        drop(run);

        self.status.set_scheduler_running(true).await;
        self.events.publish(MonitorEvent::SchedulerStarted);
        true
    }

    /// 停止调度器并等待工作任务退出（最多 5 秒）
    pub async fn stop(&self) -> bool {
        let Some(mut run) = self.run.lock().await.take() else {
            return false;
        };

        info!("停止时间调度器");
        let _ = run.cancel.send(true);
        if tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut run.handle)
            .await
            .is_err()
        {
            warn!("等待时间调度器退出超时，强制终止");
            run.handle.abort();
        }

        self.status.set_scheduler_running(false).await;
        self.events.publish(MonitorEvent::SchedulerStopped);
        true
    }

    /// 时间段配置变化后重启，重新读取边界
    pub async fn restart(&self) -> bool {
        self.stop().await;
        self.start().await
    }
}

async fn run_worker(
    monitor: Arc<dyn MonitorControl>,
    mut tracker: ScheduleTracker,
    mut cancel: watch::Receiver<bool>,
    tick_interval: Duration,
    clock: fn() -> NaiveDateTime,
) {
    loop {
        let now = clock();
        let action = tracker.tick(now, monitor.is_running());

        if action.start {
            info!("时间调度器触发启动 - 时间: {}", now.format("%H:%M"));
            if !monitor.start().await {
                error!("时间调度器启动监控失败");
            }
        }

        if action.stop {
            info!("时间调度器触发停止 - 时间: {}", now.format("%H:%M"));
            monitor.stop().await;
        }

        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {}
            _ = cancel.changed() => break,
        }
    }
    info!("时间调度器已退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::MonitorStatusActor;
    use crate::models::MonitorConfigUpdate;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn tracker() -> ScheduleTracker {
        ScheduleTracker::new(
            TimeOfDay::new(9, 0).unwrap(),
            TimeOfDay::new(18, 0).unwrap(),
        )
    }

    #[test]
    fn test_start_fires_once_when_window_opens() {
        let mut t = tracker();
        assert!(!t.tick(at(2, 8, 59), false).start);
        assert!(t.tick(at(2, 9, 0), false).start);
        // 之后保持运行
        assert!(!t.tick(at(2, 9, 1), true).start);
    }

    #[test]
    fn test_no_restart_same_day_after_failure_stop() {
        let mut t = tracker();
        assert!(t.tick(at(2, 9, 0), false).start);

        // 因连续失败停机后，时间段内的检查不会再次启动
        for minute in 1..30 {
            let action = t.tick(at(2, 10, minute), false);
            assert!(!action.start);
            assert!(!action.stop);
        }
    }

    #[test]
    fn test_stop_fires_once_on_crossing() {
        let mut t = tracker();
        t.tick(at(2, 9, 0), false);

        assert!(!t.tick(at(2, 17, 59), true).stop);
        assert!(t.tick(at(2, 18, 0), true).stop);
        // 已经越过边界，不再重复
        assert!(!t.tick(at(2, 18, 1), true).stop);
    }

    #[test]
    fn test_no_stop_without_previous_tick() {
        let mut t = tracker();
        // 首次检查就在停止时间之后（比如手动启动后才开启调度器）
        assert!(!t.tick(at(2, 18, 30), true).stop);
        assert!(!t.tick(at(2, 18, 31), true).stop);
    }

    #[test]
    fn test_outside_window_never_starts() {
        let mut t = tracker();
        assert!(!t.tick(at(2, 18, 0), false).start);
        assert!(!t.tick(at(2, 23, 59), false).start);
        assert!(!t.tick(at(3, 0, 0), false).start);
        assert!(!t.tick(at(3, 8, 59), false).start);
    }

    #[test]
    fn test_day_rollover_allows_next_start() {
        let mut t = tracker();
        assert!(t.tick(at(2, 9, 0), false).start);
        assert!(!t.tick(at(2, 12, 0), false).start);

        assert!(t.tick(at(3, 9, 0), false).start);
    }

    #[test]
    fn test_stop_edge_not_seen_across_midnight() {
        let mut t = tracker();
        t.tick(at(2, 17, 59), true);
        // 跨天后 last_minute 被重置
        assert!(!t.tick(at(3, 18, 0), true).stop);
    }

    #[derive(Default)]
    struct FakeMonitor {
        running: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        /// start 永不返回
        hang_on_start: bool,
        /// 卡住的 start 被丢弃（任务被终止）
        start_dropped: AtomicBool,
    }

    struct DropFlag<'a>(&'a AtomicBool);

    impl Drop for DropFlag<'_> {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MonitorControl for FakeMonitor {
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn start(&self) -> bool {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_start {
                let _flag = DropFlag(&self.start_dropped);
                std::future::pending::<()>().await;
            }
            !self.running.swap(true, Ordering::SeqCst)
        }

        async fn stop(&self) -> bool {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.swap(false, Ordering::SeqCst)
        }
    }

    fn ten_am() -> NaiveDateTime {
        at(2, 10, 0)
    }

    async fn scheduler(
        dir: &std::path::Path,
        enable: bool,
    ) -> (Arc<FakeMonitor>, DailyScheduler, MonitorStatusHandle) {
        scheduler_with(dir, enable, FakeMonitor::default()).await
    }

    async fn scheduler_with(
        dir: &std::path::Path,
        enable: bool,
        monitor: FakeMonitor,
    ) -> (Arc<FakeMonitor>, DailyScheduler, MonitorStatusHandle) {
        let settings = Arc::new(
            SettingsManager::new(dir.join("monitor_config.json"))
                .await
                .unwrap(),
        );
        settings
            .update(MonitorConfigUpdate {
                enable_time_scheduler: Some(enable),
                ..Default::default()
            })
            .await
            .unwrap();

        let monitor = Arc::new(monitor);
        let status = MonitorStatusActor::spawn();
        let scheduler = DailyScheduler::new(
            monitor.clone(),
            settings,
            status.clone(),
            Arc::new(EventBus::new(16)),
        )
        .with_tick_interval(Duration::from_millis(10))
        .with_clock(ten_am);
        (monitor, scheduler, status)
    }

    #[tokio::test]
    async fn test_disabled_scheduler_does_not_start() {
        let dir = tempdir().unwrap();
        let (_, scheduler, _) = scheduler(dir.path(), false).await;
        assert!(!scheduler.start().await);
        assert!(!scheduler.is_running().await);
        assert!(!scheduler.stop().await);
    }

    #[tokio::test]
    async fn test_worker_starts_monitor_once_per_day() {
        let dir = tempdir().unwrap();
        let (monitor, scheduler, status) = scheduler(dir.path(), true).await;

        assert!(scheduler.start().await);
        assert!(!scheduler.start().await);
        assert!(status.get().await.is_scheduler_running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 1);

        // 模拟连续失败停机：同一天不再自动启动
        monitor.running.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 1);

        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running().await);
        assert!(!status.get().await.is_scheduler_running);
    }

    #[tokio::test]
    async fn test_stop_aborts_stuck_worker() {
        let dir = tempdir().unwrap();
        let (monitor, scheduler, status) = scheduler_with(
            dir.path(),
            true,
            FakeMonitor {
                hang_on_start: true,
                ..Default::default()
            },
        )
        .await;

        assert!(scheduler.start().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 1);

        let started = std::time::Instant::now();
        assert!(scheduler.stop().await);
        assert!(started.elapsed() >= STOP_JOIN_TIMEOUT);
        assert!(!status.get().await.is_scheduler_running);

        // 工作任务被终止而不是留在后台
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.start_dropped.load(Ordering::SeqCst));

        // 重启后只有新的工作任务在运行
        assert!(scheduler.start().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 2);
        assert!(scheduler.stop().await);
    }
}
