// 视觉分析器 - 调用 OpenAI 兼容的 chat/completions 接口（默认 Kimi）

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{parse_analysis, Analyzer};
use crate::models::AnalysisResult;

const ANALYSIS_PROMPT: &str = r#"你是学习监督助手，分析图片中孩子的学习状态。

返回JSON格式：
{
  "at_desk": true/false,
  "is_study": true/false,
  "activity": "看书/写字/用电脑/玩手机/发呆/其他",
  "posture": "端正/不佳/趴着/歪坐/其他",
  "lighting": "充足/一般/昏暗",
  "overall_status": "当前学习状态的完整描述（20-100字）"
}

判断 at_desk 为孩子是否坐在书桌前；is_study 为是否在学习。
判断 posture 时请特别关注下肢和脚部姿势，例如脚踩在椅子上、双腿蜷缩在椅面、盘腿坐在椅子上都属于不规范坐姿。

只返回纯JSON，无其他内容。"#;

/// 视觉模型配置
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.moonshot.cn/v1".to_string(),
            model: "moonshot-v1-8k-vision-preview".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct VisionAnalyzer {
    config: VisionConfig,
    client: Client,
}

impl VisionAnalyzer {
    pub fn new(config: VisionConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("视觉模型 API key 未配置"))
    }

    /// 将图片文件转换为base64
    async fn image_to_base64(path: &Path) -> Result<String> {
        let image_data = tokio::fs::read(path)
            .await
            .map_err(|e| anyhow!("读取图片失败 {:?}: {}", path, e))?;
        Ok(general_purpose::STANDARD.encode(&image_data))
    }

    async fn call_api(&self, image_base64: &str) -> Result<String> {
        let api_key = self.api_key()?;

        let request_body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": ANALYSIS_PROMPT},
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:image/jpeg;base64,{}", image_base64)
                            }
                        }
                    ]
                }
            ],
            "temperature": 0.3,
            "response_format": {"type": "json_object"}
        });

        debug!("调用视觉模型: model={}, url={}", self.config.model, self.endpoint());

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("视觉模型 API 错误 ({}): {}", status, error_text));
        }

        let body: serde_json::Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("API 响应格式错误: {}", body))
    }
}

#[async_trait]
impl Analyzer for VisionAnalyzer {
    async fn analyze(&self, image_path: &Path) -> Result<AnalysisResult> {
        info!("开始分析图片: {:?}", image_path);
        let image_base64 = Self::image_to_base64(image_path).await?;

        let attempts = self.config.max_retries.max(1);
        let mut last_error = anyhow!("未调用 API");
        for attempt in 1..=attempts {
            match self.call_api(&image_base64).await {
                Ok(content) => {
                    let analysis = parse_analysis(&content)?;
                    info!("分析完成: {} 个字段", analysis.len());
                    return Ok(analysis);
                }
                Err(e) => {
                    warn!("API 调用失败（第 {} 次）: {}", attempt, e);
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        error!("API 调用失败（已重试 {} 次）", attempts);
        Err(last_error.context(format!("API 调用失败（已重试 {} 次）", attempts)))
    }

    /// 测试 API 连接
    async fn test_connection(&self) -> Result<()> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "model": self.config.model,
                "messages": [{"role": "user", "content": "Hello"}],
                "max_tokens": 10
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("连接测试失败 ({}): {}", status, error_text));
        }
        info!("视觉模型 API 连接测试成功");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(base_url: &str, api_key: Option<&str>) -> VisionConfig {
        VisionConfig {
            api_key: api_key.map(|s| s.to_string()),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            ..VisionConfig::default()
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let analyzer = VisionAnalyzer::new(config("https://api.moonshot.cn/v1/", None)).unwrap();
        assert_eq!(analyzer.endpoint(), "https://api.moonshot.cn/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_missing_image_fails() {
        let analyzer = VisionAnalyzer::new(config("http://127.0.0.1:9", Some("k"))).unwrap();
        let err = analyzer
            .analyze(Path::new("/nonexistent/snapshot.jpg"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("读取图片失败"));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_after_retries() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("a.jpg");
        std::fs::write(&image, b"jpeg").unwrap();

        let analyzer = VisionAnalyzer::new(config("http://127.0.0.1:9", None)).unwrap();
        assert!(analyzer.analyze(&image).await.is_err());
        assert!(analyzer.test_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_error() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("a.jpg");
        std::fs::write(&image, b"jpeg").unwrap();

        let analyzer = VisionAnalyzer::new(config("http://127.0.0.1:9", Some("k"))).unwrap();
        assert!(analyzer.analyze(&image).await.is_err());
    }
}
