// 图像分析模块 - 把截图交给视觉模型，返回扁平的 字段 -> 值 结果

pub mod vision;

pub use vision::{VisionAnalyzer, VisionConfig};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use llm_json::{loads, repair_json, RepairOptions};
use std::path::Path;

use crate::models::AnalysisResult;

/// 图像分析器
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// 分析一张图片；失败时本周期跳过
    async fn analyze(&self, image_path: &Path) -> Result<AnalysisResult>;

    /// 测试模型服务是否可用
    async fn test_connection(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// 解析模型返回的文本：去掉代码块标记，必要时修复 JSON，结果必须是对象
pub fn parse_analysis(raw: &str) -> Result<AnalysisResult> {
    let cleaned = strip_code_fence(raw);
    if cleaned.is_empty() {
        return Err(anyhow!("模型没有返回内容"));
    }

    let value = match serde_json::from_str::<serde_json::Value>(&cleaned) {
        Ok(value) => value,
        Err(_) => {
            let repaired = repair_json(&cleaned, &RepairOptions::default())
                .map_err(|e| anyhow!("无法修复模型返回的 JSON: {}", e))?;
            loads(&repaired, &RepairOptions::default())
                .map_err(|e| anyhow!("解析修复后的 JSON 失败: {}", e))?
        }
    };

    AnalysisResult::from_value(value)
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let mut lines = trimmed.lines();
        // 跳过 ```json 或 ``` 开头
        lines.next();
        let mut body = Vec::new();
        for line in lines {
            if line.trim_start().starts_with("```") {
                break;
            }
            body.push(line);
        }
        body.join("\n")
    } else {
        trimmed.to_string()
    }
}
