// Telegram Bot 适配器

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::{file_name, read_image, MessageAdapter};

/// Telegram 图片上限 10MB
const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramResponse {
    fn check(self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(anyhow!(
                "Telegram 返回错误: {}",
                self.description.unwrap_or_else(|| "未知错误".to_string())
            ))
        }
    }
}

pub struct TelegramAdapter {
    config: TelegramConfig,
    client: Client,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        info!("Telegram 初始化 - chat_id: {}", config.chat_id);
        Ok(Self { config, client })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }
}

#[async_trait]
impl MessageAdapter for TelegramAdapter {
    fn platform(&self) -> &'static str {
        "telegram"
    }

    async fn send_text(&self, content: &str) -> Result<()> {
        let response: TelegramResponse = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": content
            }))
            .send()
            .await?
            .json()
            .await?;
        response.check()
    }

    async fn send_image(&self, image_path: &Path) -> Result<()> {
        let bytes = read_image(image_path, MAX_IMAGE_BYTES).await?;

        let form = multipart::Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .part(
                "photo",
                multipart::Part::bytes(bytes).file_name(file_name(image_path)),
            );

        let response: TelegramResponse = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        response.check()
    }
}
