// 进程级配置 - 启动时从环境变量读取一次

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::warn;

use crate::analyzer::VisionConfig;
use crate::camera::CameraSettings;
use crate::messenger::{TelegramConfig, WeComConfig};
use crate::storage::StorageConfig;

/// 应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// 监控配置文件（JSON）
    pub monitor_config_path: PathBuf,
    pub storage: StorageConfig,
    pub camera: CameraSettings,
    /// V4L2 设备路径，未设置时按索引打开
    pub camera_device: Option<String>,
    pub vision: VisionConfig,
    pub wecom: Option<WeComConfig>,
    pub telegram: Option<TelegramConfig>,
}

/// 未设置 STUDY_MONITOR_DATA_DIR 时的数据目录
pub const DEFAULT_DATA_DIR: &str = "data";

/// 数据目录（日志初始化早于完整配置读取时使用）
pub fn data_dir_from_env() -> PathBuf {
    std::env::var("STUDY_MONITOR_DATA_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

impl AppConfig {
    /// 从进程环境读取
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源读取（测试时传入闭包）
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(get("STUDY_MONITOR_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let monitor_config_path = get("STUDY_MONITOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("monitor_config.json"));

        let mut storage = StorageConfig::new(&data_dir);
        if let Some(days) = get("RETENTION_DAYS") {
            storage.retention_days = parse_number("RETENTION_DAYS", &days)?;
        }

        let mut camera = CameraSettings {
            output_dir: storage.captures_dir.clone(),
            ..CameraSettings::default()
        };
        if let Some(index) = get("CAMERA_INDEX") {
            camera.index = parse_number("CAMERA_INDEX", &index)?;
        }
        if let Some(resolution) = get("RESOLUTION") {
            camera.resolution = parse_resolution(&resolution)?;
        }
        if let Some(quality) = get("IMAGE_QUALITY") {
            let quality: u8 = parse_number("IMAGE_QUALITY", &quality)?;
            camera.jpeg_quality = quality.clamp(1, 100);
        }

        let mut vision = VisionConfig {
            api_key: get("KIMI_API_KEY"),
            ..VisionConfig::default()
        };
        if let Some(base_url) = get("KIMI_BASE_URL") {
            vision.base_url = base_url;
        }
        if let Some(model) = get("KIMI_MODEL") {
            vision.model = model;
        }
        if let Some(timeout) = get("KIMI_TIMEOUT") {
            vision.timeout = Duration::from_secs(parse_number("KIMI_TIMEOUT", &timeout)?);
        }

        let wecom = match (
            get("WECHAT_CORPID"),
            get("WECHAT_SECRET"),
            get("WECHAT_AGENTID"),
        ) {
            (Some(corp_id), Some(secret), Some(agent_id)) => Some(WeComConfig::new(
                corp_id,
                secret,
                parse_number("WECHAT_AGENTID", &agent_id)?,
                get("WECHAT_TOUSER").unwrap_or_else(|| "@all".into()),
            )),
            (None, None, None) => None,
            _ => {
                warn!("企业微信配置不完整（需要 WECHAT_CORPID/WECHAT_SECRET/WECHAT_AGENTID），已跳过");
                None
            }
        };

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(token), Some(chat_id)) => Some(TelegramConfig::new(token, chat_id)),
            (None, None) => None,
            _ => {
                warn!("Telegram 配置不完整（需要 TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID），已跳过");
                None
            }
        };

        Ok(Self {
            data_dir,
            monitor_config_path,
            storage,
            camera,
            camera_device: get("CAMERA_DEVICE"),
            vision,
            wecom,
            telegram,
        })
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("环境变量 {} 不是有效数字: {}", key, value))
}

/// 解析 "宽,高" 格式的分辨率
fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .split_once(|c: char| c == ',' || c == 'x')
        .ok_or_else(|| anyhow!("分辨率格式应为 宽,高: {}", value))?;
    Ok((
        parse_number("RESOLUTION", width)?,
        parse_number("RESOLUTION", height)?,
    ))
}
