// 企业微信应用消息适配器
//
// access_token 缓存，提前 5 分钟过期；接收人用 | 分隔

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{file_name, read_image, MessageAdapter};

/// 企业微信图片上限 2MB
const MAX_IMAGE_BYTES: u64 = 2 * 1024 * 1024;
const TOKEN_EARLY_EXPIRY_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct WeComConfig {
    pub corp_id: String,
    pub secret: String,
    pub agent_id: i64,
    /// 接收人，多个用 | 分隔
    pub to_user: String,
    pub api_base: String,
}

impl WeComConfig {
    pub fn new(corp_id: String, secret: String, agent_id: i64, to_user: String) -> Self {
        Self {
            corp_id,
            secret,
            agent_id,
            to_user,
            api_base: "https://qyapi.weixin.qq.com/cgi-bin".to_string(),
        }
    }

    pub fn recipients(&self) -> Vec<&str> {
        split_recipients(&self.to_user)
    }
}

fn split_recipients(to_user: &str) -> Vec<&str> {
    to_user
        .split('|')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
struct WeComResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    access_token: Option<String>,
    expires_in: Option<u64>,
    media_id: Option<String>,
}

impl WeComResponse {
    fn check(self, action: &str) -> Result<Self> {
        if self.errcode == 0 {
            Ok(self)
        } else {
            Err(anyhow!("{}失败: {} ({})", action, self.errmsg, self.errcode))
        }
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct WeComAdapter {
    config: WeComConfig,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl WeComAdapter {
    pub fn new(config: WeComConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        info!(
            "企业微信初始化 - corpid: {}, agentid: {}",
            config.corp_id, config.agent_id
        );
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    /// 获取访问令牌（带缓存）
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let response: WeComResponse = self
            .client
            .get(format!("{}/gettoken", self.config.api_base))
            .query(&[
                ("corpid", self.config.corp_id.as_str()),
                ("corpsecret", self.config.secret.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;
        let response = response.check("获取 access_token ")?;

        let token = response
            .access_token
            .ok_or_else(|| anyhow!("响应中缺少 access_token"))?;
        let lifetime = response
            .expires_in
            .unwrap_or(7200)
            .saturating_sub(TOKEN_EARLY_EXPIRY_SECS);

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        info!("获取 access_token 成功");
        Ok(token)
    }

    async fn send_to_all(
        &self,
        token: &str,
        build: impl Fn(&str) -> serde_json::Value + Send + Sync,
    ) -> Result<()> {
        let recipients = self.config.recipients();
        if recipients.is_empty() {
            return Err(anyhow!("未配置企业微信接收人"));
        }

        let url = format!("{}/message/send", self.config.api_base);
        let mut failed = Vec::new();
        for user in recipients {
            let result = async {
                let response: WeComResponse = self
                    .client
                    .post(&url)
                    .query(&[("access_token", token)])
                    .json(&build(user))
                    .send()
                    .await?
                    .json()
                    .await?;
                response.check("发送消息")
            }
            .await;

            if let Err(e) = result {
                warn!("发送到 {} 失败: {}", user, e);
                failed.push(user);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("部分接收人发送失败: {}", failed.join("|")))
        }
    }
}

#[async_trait]
impl MessageAdapter for WeComAdapter {
    fn platform(&self) -> &'static str {
        "wecom"
    }

    async fn send_text(&self, content: &str) -> Result<()> {
        let token = self.access_token().await?;
        let agent_id = self.config.agent_id;
        self.send_to_all(&token, |user| {
            json!({
                "touser": user,
                "msgtype": "text",
                "agentid": agent_id,
                "text": {"content": content},
                "safe": 0
            })
        })
        .await
    }

    async fn send_image(&self, image_path: &Path) -> Result<()> {
        let bytes = read_image(image_path, MAX_IMAGE_BYTES).await?;
        let token = self.access_token().await?;

        // 先上传临时素材，再按 media_id 发送
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name(image_path))
            .mime_str("image/jpeg")?;
        let upload: WeComResponse = self
            .client
            .post(format!("{}/media/upload", self.config.api_base))
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .multipart(multipart::Form::new().part("media", part))
            .send()
            .await?
            .json()
            .await?;
        let media_id = upload
            .check("上传图片")?
            .media_id
            .ok_or_else(|| anyhow!("上传响应中缺少 media_id"))?;
        info!("上传图片成功: media_id={}", media_id);

        let agent_id = self.config.agent_id;
        self.send_to_all(&token, |user| {
            json!({
                "touser": user,
                "msgtype": "image",
                "agentid": agent_id,
                "image": {"media_id": media_id},
                "safe": 0
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn adapter(api_base: &str) -> WeComAdapter {
        let mut config = WeComConfig::new("corp".into(), "secret".into(), 1000002, "alice".into());
        config.api_base = api_base.to_string();
        WeComAdapter::new(config).unwrap()
    }

    #[test]
    fn test_recipients_split_on_pipe() {
        assert_eq!(split_recipients("alice| bob ||carol"), vec!["alice", "bob", "carol"]);
        assert!(split_recipients(" | ").is_empty());
    }

    #[test]
    fn test_error_code_is_failure() {
        let ok: WeComResponse = serde_json::from_str(r#"{"errcode":0,"errmsg":"ok"}"#).unwrap();
        assert!(ok.check("发送消息").is_ok());

        let bad: WeComResponse =
            serde_json::from_str(r#"{"errcode":40014,"errmsg":"invalid access_token"}"#).unwrap();
        let err = bad.check("发送消息").unwrap_err();
        assert!(err.to_string().contains("40014"));
    }

    #[tokio::test]
    async fn test_oversized_image_rejected_before_network() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.jpg");
        std::fs::write(&path, vec![0u8; (MAX_IMAGE_BYTES + 1) as usize]).unwrap();

        let err = adapter("http://127.0.0.1:9").send_image(&path).await.unwrap_err();
        assert!(err.to_string().contains("2MB"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_error() {
        assert!(adapter("http://127.0.0.1:9").send_text("hi").await.is_err());
    }
}
