// 消息推送模块 - 把通知发往企业微信 / Telegram
//
// 文本和图片是两个独立操作，任意一个平台发送成功即视为成功

pub mod telegram;
pub mod wecom;

pub use telegram::{TelegramAdapter, TelegramConfig};
pub use wecom::{WeComAdapter, WeComConfig};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::Path;
use tracing::{error, info, warn};

use crate::models::{value_to_text, AnalysisResult, NotifyLevel};

/// 监控循环使用的推送接口
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, text: &str, level: NotifyLevel) -> bool;

    async fn send_image(&self, image_path: &Path, level: NotifyLevel) -> bool;
}

/// 单个平台的适配器
#[async_trait]
pub trait MessageAdapter: Send + Sync {
    fn platform(&self) -> &'static str;

    async fn send_text(&self, content: &str) -> Result<()>;

    async fn send_image(&self, image_path: &Path) -> Result<()>;
}

/// 多平台推送
pub struct MessengerHub {
    adapters: Vec<Box<dyn MessageAdapter>>,
}

impl MessengerHub {
    pub fn new(adapters: Vec<Box<dyn MessageAdapter>>) -> Self {
        info!("消息推送初始化 - 已加载 {} 个适配器", adapters.len());
        if adapters.is_empty() {
            warn!("未配置任何消息平台，通知将不会发出");
        }
        Self { adapters }
    }

    pub fn has_adapters(&self) -> bool {
        !self.adapters.is_empty()
    }

    pub fn platforms(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.platform()).collect()
    }
}

#[async_trait]
impl Messenger for MessengerHub {
    async fn send(&self, text: &str, level: NotifyLevel) -> bool {
        let mut success = false;
        for adapter in &self.adapters {
            match adapter.send_text(text).await {
                Ok(()) => {
                    info!("[{}] 文本消息发送成功 (级别: {})", adapter.platform(), level);
                    success = true;
                }
                Err(e) => error!("[{}] 文本消息发送失败: {}", adapter.platform(), e),
            }
        }
        success
    }

    async fn send_image(&self, image_path: &Path, level: NotifyLevel) -> bool {
        let mut success = false;
        for adapter in &self.adapters {
            match adapter.send_image(image_path).await {
                Ok(()) => {
                    info!("[{}] 图片发送成功 (级别: {})", adapter.platform(), level);
                    success = true;
                }
                Err(e) => error!("[{}] 图片发送失败: {}", adapter.platform(), e),
            }
        }
        success
    }
}

/// 构建通知文本
pub fn build_notification_text(
    consecutive_failures: u32,
    analysis: &AnalysisResult,
    now: DateTime<Local>,
) -> String {
    let mut message = String::from("Study Buddy Notification\n\n");
    message.push_str(&format!("Consecutive Failures: {}\n\n", consecutive_failures));

    message.push_str("Analysis Results:\n");
    for (key, value) in analysis.iter() {
        message.push_str(&format!("  {}: {}\n", key, value_to_text(value)));
    }

    message.push_str(&format!("\nTime: {}", now.format("%Y-%m-%d %H:%M:%S")));
    message
}

/// 读取待发送的图片并检查大小
pub(crate) async fn read_image(image_path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let metadata = tokio::fs::metadata(image_path)
        .await
        .map_err(|_| anyhow!("图片文件不存在: {:?}", image_path))?;

    if metadata.len() > max_bytes {
        return Err(anyhow!(
            "图片大小超过{}MB限制: {:.2}MB",
            max_bytes / 1024 / 1024,
            metadata.len() as f64 / 1024.0 / 1024.0
        ));
    }

    Ok(tokio::fs::read(image_path).await?)
}

pub(crate) fn file_name(image_path: &Path) -> String {
    image_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("snapshot.jpg")
        .to_string()
}
