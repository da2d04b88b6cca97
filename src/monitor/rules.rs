// 规则检查器 - 只支持 字段名 + 正则 的简单匹配
//
// 所有规则字段都是必需的；正则在配置更新时编译，检查时不会失败

use crate::models::{AnalysisResult, Rule, RuleVerdict};
use anyhow::{anyhow, Result};
use regex::{Regex, RegexBuilder};
use tracing::debug;

/// 字段缺失时的失败原因
pub const FIELD_MISSING: &str = "field missing";

/// 已编译的单条规则
#[derive(Debug, Clone)]
struct CompiledRule {
    key: String,
    regex: Regex,
}

/// 已编译的规则集
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// 编译规则列表，任意一条正则无效则整体失败
    pub fn compile(rules: &[Rule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            if rule.key.trim().is_empty() {
                return Err(anyhow!("规则格式错误，字段名不能为空: {:?}", rule));
            }

            // 只锚定开头，与"从字符串开头匹配"的语义一致
            let regex = RegexBuilder::new(&format!("^(?:{})", rule.regexp))
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    anyhow!("无效的正则表达式 [{}]: {}, 错误: {}", rule.key, rule.regexp, e)
                })?;

            compiled.push(CompiledRule {
                key: rule.key.clone(),
                regex,
            });
        }

        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 检查分析结果，所有规则都会被检查（不短路）
    pub fn evaluate(&self, analysis: &AnalysisResult) -> RuleVerdict {
        let mut failed_fields = Vec::new();
        let mut passed_fields = Vec::new();

        for rule in &self.rules {
            let Some(value) = analysis.get_text(&rule.key) else {
                failed_fields.push((rule.key.clone(), FIELD_MISSING.to_string()));
                continue;
            };

            if rule.regex.is_match(&value) {
                passed_fields.push(rule.key.clone());
            } else {
                failed_fields.push((rule.key.clone(), format!("{}: {}", rule.key, value)));
            }
        }

        let valid = failed_fields.is_empty();
        debug!(
            "规则检查完成 - 合规: {}, 通过: {}, 失败: {}",
            valid,
            passed_fields.len(),
            failed_fields.len()
        );

        RuleVerdict {
            valid,
            failed_fields,
            passed_fields,
        }
    }
}
