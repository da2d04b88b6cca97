// 数据模型模块 - 定义监控核心的数据结构

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// 单条规则：字段名 + 正则表达式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// 分析结果中的字段名
    pub key: String,
    /// 匹配字段值的正则（从开头匹配，不区分大小写）
    pub regexp: String,
}

impl Rule {
    pub fn new(key: impl Into<String>, regexp: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            regexp: regexp.into(),
        }
    }
}

/// 一天中的时刻（HH:MM），用于每日调度窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(anyhow!("无效的时间: {:02}:{:02}", hour, minute));
        }
        Ok(Self { hour, minute })
    }

    /// 解析 "HH:MM" 格式
    pub fn parse(text: &str) -> Result<Self> {
        let (h, m) = text
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow!("时间格式错误，应为 HH:MM: {}", text))?;
        let hour = h
            .trim()
            .parse::<u32>()
            .map_err(|_| anyhow!("时间格式错误，应为 HH:MM: {}", text))?;
        let minute = m
            .trim()
            .parse::<u32>()
            .map_err(|_| anyhow!("时间格式错误，应为 HH:MM: {}", text))?;
        Self::new(hour, minute)
    }

    /// 距午夜的分钟数
    pub fn minutes_since_midnight(&self) -> u32 {
        self.hour * 60 + self.minute
    }

    pub fn from_naive(time: NaiveTime) -> Self {
        Self {
            hour: time.hour(),
            minute: time.minute(),
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        TimeOfDay::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// 监控配置（持久化到 JSON 文件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 规则列表（按顺序检查）
    pub rules: Vec<Rule>,
    /// 最小通知间隔（分钟）- 距上次通知太近则不通知
    pub min_notify_interval: u64,
    /// 最大通知间隔（分钟）- 距上次通知太久则强制通知
    pub max_notify_interval: u64,
    /// 连续失败次数限制 - 达到后停止监控
    pub consecutive_fail_limit: u32,
    /// 每日自动开始时间
    pub auto_start_time: Option<TimeOfDay>,
    /// 每日自动停止时间
    pub auto_stop_time: Option<TimeOfDay>,
    /// 是否启用时间调度
    pub enable_time_scheduler: bool,
    /// 截图间隔（秒）
    pub capture_interval: u64,
    /// 预览时长（秒）
    pub preview_duration: u64,
    /// 是否启用预览
    pub enable_preview: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                Rule::new("at_desk", "^true$"),
                Rule::new("is_study", "^true$"),
                Rule::new("activity", "^(看书|写字)$"),
                Rule::new("posture", "^(端正)$"),
                Rule::new("lighting", "^(充足|一般)$"),
            ],
            min_notify_interval: 10,
            max_notify_interval: 60,
            consecutive_fail_limit: 5,
            auto_start_time: Some(TimeOfDay { hour: 9, minute: 0 }),
            auto_stop_time: Some(TimeOfDay { hour: 18, minute: 0 }),
            enable_time_scheduler: false,
            capture_interval: 30,
            preview_duration: 10,
            enable_preview: true,
        }
    }
}

impl MonitorConfig {
    /// 最小通知间隔
    pub fn min_notify(&self) -> chrono::Duration {
        minutes(self.min_notify_interval)
    }

    /// 最大通知间隔
    pub fn max_notify(&self) -> chrono::Duration {
        minutes(self.max_notify_interval)
    }

    /// 截图间隔
    pub fn capture_every(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.capture_interval)
    }

    /// 预览时长
    pub fn preview_for(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.preview_duration)
    }
}

/// 超出 chrono 表示范围时取最大值
fn minutes(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .unwrap_or(chrono::Duration::MAX)
}

/// 监控配置的部分更新（只修改提供的字段）
///
/// 时间字段使用双层 Option：外层表示是否修改，内层 None 表示清空
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfigUpdate {
    pub rules: Option<Vec<Rule>>,
    pub min_notify_interval: Option<u64>,
    pub max_notify_interval: Option<u64>,
    pub consecutive_fail_limit: Option<u32>,
    #[serde(deserialize_with = "double_option")]
    pub auto_start_time: Option<Option<TimeOfDay>>,
    #[serde(deserialize_with = "double_option")]
    pub auto_stop_time: Option<Option<TimeOfDay>>,
    pub enable_time_scheduler: Option<bool>,
    pub capture_interval: Option<u64>,
    pub preview_duration: Option<u64>,
    pub enable_preview: Option<bool>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<TimeOfDay>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<TimeOfDay>::deserialize(deserializer).map(Some)
}

impl MonitorConfigUpdate {
    /// 是否修改了时间调度相关字段
    pub fn touches_scheduler(&self) -> bool {
        self.enable_time_scheduler.is_some()
            || self.auto_start_time.is_some()
            || self.auto_stop_time.is_some()
    }

    /// 被修改的字段名
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.rules.is_some() {
            names.push("rules");
        }
        if self.min_notify_interval.is_some() {
            names.push("min_notify_interval");
        }
        if self.max_notify_interval.is_some() {
            names.push("max_notify_interval");
        }
        if self.consecutive_fail_limit.is_some() {
            names.push("consecutive_fail_limit");
        }
        if self.auto_start_time.is_some() {
            names.push("auto_start_time");
        }
        if self.auto_stop_time.is_some() {
            names.push("auto_stop_time");
        }
        if self.enable_time_scheduler.is_some() {
            names.push("enable_time_scheduler");
        }
        if self.capture_interval.is_some() {
            names.push("capture_interval");
        }
        if self.preview_duration.is_some() {
            names.push("preview_duration");
        }
        if self.enable_preview.is_some() {
            names.push("enable_preview");
        }
        names
    }

    /// 把更新应用到配置副本上
    pub fn apply_to(&self, config: &mut MonitorConfig) {
        if let Some(rules) = &self.rules {
            config.rules = rules.clone();
        }
        if let Some(value) = self.min_notify_interval {
            config.min_notify_interval = value;
        }
        if let Some(value) = self.max_notify_interval {
            config.max_notify_interval = value;
        }
        if let Some(value) = self.consecutive_fail_limit {
            config.consecutive_fail_limit = value;
        }
        if let Some(value) = self.auto_start_time {
            config.auto_start_time = value;
        }
        if let Some(value) = self.auto_stop_time {
            config.auto_stop_time = value;
        }
        if let Some(value) = self.enable_time_scheduler {
            config.enable_time_scheduler = value;
        }
        if let Some(value) = self.capture_interval {
            config.capture_interval = value;
        }
        if let Some(value) = self.preview_duration {
            config.preview_duration = value;
        }
        if let Some(value) = self.enable_preview {
            config.enable_preview = value;
        }
    }
}

/// AI 分析结果 - 扁平的 字段名 -> 值 映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisResult(Map<String, Value>);

impl AnalysisResult {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// 从 JSON 值构建，只接受对象
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(anyhow!("分析结果不是 JSON 对象: {}", other)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// 把字段值转成字符串用于规则匹配（字符串不带引号）
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.0.get(key).map(value_to_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// JSON 值转文本：字符串取原文，其余使用 JSON 表示
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 规则检查结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    /// 是否整体合规
    pub valid: bool,
    /// 不合规字段: 字段名 -> 原因（按规则顺序）
    pub failed_fields: Vec<(String, String)>,
    /// 合规字段
    pub passed_fields: Vec<String>,
}

impl RuleVerdict {
    /// 所有失败原因
    pub fn issues(&self) -> Vec<String> {
        self.failed_fields
            .iter()
            .map(|(_, reason)| reason.clone())
            .collect()
    }

    pub fn failure_for(&self, field: &str) -> Option<&str> {
        self.failed_fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, reason)| reason.as_str())
    }
}

/// 通知级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Danger,
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Danger => "danger",
        };
        f.write_str(text)
    }
}

/// 通知判定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyDecision {
    /// 是否应该通知
    pub should_notify: bool,
    /// 是否应该停止监控
    pub should_stop: bool,
    /// 通知级别
    pub level: NotifyLevel,
    /// 原因说明
    pub reason: String,
}

/// 监控状态快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// 监控循环是否运行
    pub is_monitoring: bool,
    /// 时间调度器是否运行
    pub is_scheduler_running: bool,
    /// 最近一次启动时间
    pub start_time: Option<DateTime<Local>>,
    /// 最近一次停止时间
    pub stop_time: Option<DateTime<Local>>,
    /// 已处理截图数
    pub snapshots_processed: u64,
    /// 已发送通知数
    pub notifications_sent: u64,
    /// 最近一次判定
    pub last_decision: Option<NotifyDecision>,
    /// 最近一次规则检查结果
    pub last_verdict: Option<RuleVerdict>,
    /// 当前连续失败次数
    pub consecutive_failures: u32,
    /// 最近一次错误
    pub last_error: Option<String>,
}
