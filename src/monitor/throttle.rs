// 通知节流器 - 判断是否通知、是否停止监控
//
// 状态：连续失败次数 + 最后通知时间，每个周期只由 decide 修改一次
// 1. 连续失败次数 >= 限制：停止（在本周期计数更新之前检查）
// 2. 距上次通知 < 最小间隔：不通知（即使不合格）
// 3. 距上次通知 > 最大间隔：强制通知（即使合格）
// 4. 每次启动监控时重置

use crate::models::{MonitorConfig, NotifyDecision, NotifyLevel};
use chrono::{DateTime, Duration, Local};
use tracing::{info, warn};

/// 节流策略（来自当前配置快照）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub fail_limit: u32,
}

impl From<&MonitorConfig> for ThrottlePolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            min_interval: config.min_notify(),
            max_interval: config.max_notify(),
            fail_limit: config.consecutive_fail_limit,
        }
    }
}

/// 通知节流状态机
#[derive(Debug, Default)]
pub struct NotificationThrottle {
    consecutive_failures: u32,
    last_notify_time: Option<DateTime<Local>>,
}

impl NotificationThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_notify_time(&self) -> Option<DateTime<Local>> {
        self.last_notify_time
    }

    /// 使用当前时间判定
    pub fn decide(&mut self, is_valid: bool, policy: &ThrottlePolicy) -> NotifyDecision {
        self.decide_at(is_valid, policy, Local::now())
    }

    /// 在指定时间点判定（每个周期调用一次）
    pub fn decide_at(
        &mut self,
        is_valid: bool,
        policy: &ThrottlePolicy,
        now: DateTime<Local>,
    ) -> NotifyDecision {
        // 停止检查优先，且发生在本周期计数更新之前
        if self.consecutive_failures >= policy.fail_limit {
            warn!(
                "连续失败次数达到限制 ({}/{})，停止监控",
                self.consecutive_failures, policy.fail_limit
            );
            return NotifyDecision {
                should_notify: false,
                should_stop: true,
                level: NotifyLevel::Danger,
                reason: format!(
                    "consecutive failure limit reached ({})",
                    self.consecutive_failures
                ),
            };
        }

        if is_valid {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }

        let Some(last) = self.last_notify_time else {
            self.last_notify_time = Some(now);
            return NotifyDecision {
                should_notify: true,
                should_stop: false,
                level: if is_valid {
                    NotifyLevel::Info
                } else {
                    NotifyLevel::Warning
                },
                reason: if is_valid {
                    "first check".to_string()
                } else {
                    "first check, issues found".to_string()
                },
            };
        };

        let elapsed = now - last;

        if elapsed < policy.min_interval {
            info!("距离上次通知仅 {}s，小于最小间隔，不通知", elapsed.num_seconds());
            return NotifyDecision {
                should_notify: false,
                should_stop: false,
                level: NotifyLevel::Info,
                reason: format!("suppressed: {}s since last notification", elapsed.num_seconds()),
            };
        }

        if elapsed > policy.max_interval {
            info!("距离上次通知已 {}s，强制通知", elapsed.num_seconds());
            self.last_notify_time = Some(now);
            return NotifyDecision {
                should_notify: true,
                should_stop: false,
                level: NotifyLevel::Info,
                reason: if is_valid {
                    "status update - ok".to_string()
                } else {
                    "status update - still failing".to_string()
                },
            };
        }

        if !is_valid {
            self.last_notify_time = Some(now);
            return NotifyDecision {
                should_notify: true,
                should_stop: false,
                level: NotifyLevel::Warning,
                reason: format!("consecutive failures: {}", self.consecutive_failures),
            };
        }

        NotifyDecision {
            should_notify: false,
            should_stop: false,
            level: NotifyLevel::Info,
            reason: "ok".to_string(),
        }
    }

    /// 重置状态（每次启动监控时调用）
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.last_notify_time = None;
        info!("通知节流状态已重置");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy(min: i64, max: i64, limit: u32) -> ThrottlePolicy {
        ThrottlePolicy {
            min_interval: Duration::minutes(min),
            max_interval: Duration::minutes(max),
            fail_limit: limit,
        }
    }

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_first_decision_always_notifies() {
        let mut throttle = NotificationThrottle::new();
        let d = throttle.decide_at(true, &policy(10, 60, 5), t0());
        assert!(d.should_notify);
        assert_eq!(d.level, NotifyLevel::Info);
        assert_eq!(throttle.last_notify_time(), Some(t0()));

        let mut throttle = NotificationThrottle::new();
        let d = throttle.decide_at(false, &policy(10, 60, 5), t0());
        assert!(d.should_notify);
        assert_eq!(d.level, NotifyLevel::Warning);
        assert_eq!(throttle.consecutive_failures(), 1);
    }

    #[test]
    fn test_stop_observed_on_call_after_limit_reached() {
        let p = policy(10, 60, 5);
        let mut throttle = NotificationThrottle::new();
        let mut now = t0();

        for _ in 0..5 {
            let d = throttle.decide_at(false, &p, now);
            assert!(!d.should_stop);
            now += Duration::seconds(30);
        }
        assert_eq!(throttle.consecutive_failures(), 5);

        let d = throttle.decide_at(false, &p, now);
        assert!(d.should_stop);
        assert!(!d.should_notify);
        assert_eq!(d.level, NotifyLevel::Danger);
    }

    #[test]
    fn test_limit_three_stops_on_fourth_call() {
        let p = policy(10, 60, 3);
        let mut throttle = NotificationThrottle::new();
        let mut now = t0();

        let mut stops = Vec::new();
        for _ in 0..4 {
            stops.push(throttle.decide_at(false, &p, now).should_stop);
            now += Duration::seconds(30);
        }
        assert_eq!(stops, vec![false, false, false, true]);
    }

    #[test]
    fn test_pass_resets_failure_count() {
        let p = policy(10, 60, 3);
        let mut throttle = NotificationThrottle::new();
        throttle.decide_at(false, &p, t0());
        throttle.decide_at(false, &p, t0() + Duration::minutes(1));
        throttle.decide_at(true, &p, t0() + Duration::minutes(2));
        assert_eq!(throttle.consecutive_failures(), 0);
    }

    #[test]
    fn test_min_interval_suppresses_second_failure() {
        let p = policy(10, 60, 5);
        let mut throttle = NotificationThrottle::new();

        let first = throttle.decide_at(false, &p, t0());
        let second = throttle.decide_at(false, &p, t0() + Duration::minutes(2));

        assert!(first.should_notify);
        assert!(!second.should_notify);
        assert!(second.reason.starts_with("suppressed"));
        assert_eq!(throttle.last_notify_time(), Some(t0()));
    }

    #[test]
    fn test_failure_after_min_interval_notifies_with_warning() {
        let p = policy(10, 60, 5);
        let mut throttle = NotificationThrottle::new();
        throttle.decide_at(true, &p, t0());

        let d = throttle.decide_at(false, &p, t0() + Duration::minutes(15));
        assert!(d.should_notify);
        assert_eq!(d.level, NotifyLevel::Warning);
        assert_eq!(throttle.last_notify_time(), Some(t0() + Duration::minutes(15)));
    }

    #[test]
    fn test_max_interval_forces_heartbeat_while_passing() {
        let p = policy(10, 60, 5);
        let mut throttle = NotificationThrottle::new();

        let mut notified_at = Vec::new();
        for minute in (0..=180).step_by(5) {
            let now = t0() + Duration::minutes(minute);
            let d = throttle.decide_at(true, &p, now);
            if d.should_notify {
                assert_eq!(d.level, NotifyLevel::Info);
                notified_at.push(minute);
            }
        }
        assert_eq!(notified_at, vec![0, 65, 130]);
    }

    #[test]
    fn test_passing_inside_window_does_not_refresh_time() {
        let p = policy(10, 60, 5);
        let mut throttle = NotificationThrottle::new();
        throttle.decide_at(true, &p, t0());

        let d = throttle.decide_at(true, &p, t0() + Duration::minutes(20));
        assert!(!d.should_notify);
        assert_eq!(throttle.last_notify_time(), Some(t0()));
    }

    #[test]
    fn test_reset_clears_state() {
        let p = policy(10, 60, 2);
        let mut throttle = NotificationThrottle::new();
        throttle.decide_at(false, &p, t0());
        throttle.decide_at(false, &p, t0() + Duration::minutes(1));
        assert!(throttle.decide_at(false, &p, t0() + Duration::minutes(2)).should_stop);

        throttle.reset();
        assert_eq!(throttle.consecutive_failures(), 0);
        assert_eq!(throttle.last_notify_time(), None);

        let d = throttle.decide_at(false, &p, t0() + Duration::minutes(3));
        assert!(!d.should_stop);
        assert!(d.should_notify);
    }
}
