// 设置管理 - 监控配置的加载、校验、持久化与原子替换

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{MonitorConfig, MonitorConfigUpdate};
use crate::monitor::rules::RuleSet;
use crate::monitor::throttle::ThrottlePolicy;

/// 配置快照：配置 + 编译好的规则，整体原子替换
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub config: MonitorConfig,
    pub rules: RuleSet,
}

impl ConfigSnapshot {
    /// 校验并编译配置
    pub fn build(config: MonitorConfig) -> Result<Self> {
        validate(&config)?;
        let rules = RuleSet::compile(&config.rules)?;
        Ok(Self { config, rules })
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy::from(&self.config)
    }
}

/// 通知间隔上限（分钟），一周
pub const MAX_NOTIFY_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

fn validate(config: &MonitorConfig) -> Result<()> {
    if config.capture_interval == 0 {
        return Err(anyhow!("截图间隔必须至少为1秒"));
    }
    for (name, value) in [
        ("最小通知间隔", config.min_notify_interval),
        ("最大通知间隔", config.max_notify_interval),
    ] {
        if value > MAX_NOTIFY_INTERVAL_MINUTES {
            return Err(anyhow!(
                "{}不能超过 {} 分钟: {}",
                name,
                MAX_NOTIFY_INTERVAL_MINUTES,
                value
            ));
        }
    }
    if config.consecutive_fail_limit == 0 {
        return Err(anyhow!("连续失败次数限制必须至少为1"));
    }
    if let (Some(start), Some(stop)) = (config.auto_start_time, config.auto_stop_time) {
        if start >= stop {
            return Err(anyhow!(
                "自动开始时间必须早于停止时间: {} - {}",
                start,
                stop
            ));
        }
    }
    Ok(())
}

/// 一次配置更新的结果
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub snapshot: Arc<ConfigSnapshot>,
    pub fields: Vec<&'static str>,
    pub scheduler_changed: bool,
}

pub struct SettingsManager {
    path: PathBuf,
    data: RwLock<Arc<ConfigSnapshot>>,
}

impl SettingsManager {
    /// 加载配置文件；不存在时写入默认配置
    pub async fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let config = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                serde_json::from_slice::<MonitorConfig>(&bytes).unwrap_or_else(|e| {
                    warn!("配置文件解析失败，使用默认配置: {}", e);
                    MonitorConfig::default()
                })
            }
            _ => {
                let default = MonitorConfig::default();
                write_config(&path, &default).await?;
                info!("已创建默认监控配置: {:?}", path);
                default
            }
        };

        let snapshot = match ConfigSnapshot::build(config) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("配置文件内容无效，使用默认配置: {}", e);
                ConfigSnapshot::build(MonitorConfig::default())?
            }
        };

        Ok(Self {
            path,
            data: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 获取当前配置快照
    pub async fn get(&self) -> Arc<ConfigSnapshot> {
        self.data.read().await.clone()
    }

    /// 部分更新：校验通过后先写文件再替换快照，失败时旧配置保持不变
    pub async fn update(&self, update: MonitorConfigUpdate) -> Result<ConfigChange> {
        let mut current = self.data.write().await;

        let mut next = current.config.clone();
        update.apply_to(&mut next);
        let snapshot = Arc::new(ConfigSnapshot::build(next)?);

        write_config(&self.path, &snapshot.config).await?;
        *current = snapshot.clone();

        let fields = update.field_names();
        info!("配置已更新: {:?}", fields);

        Ok(ConfigChange {
            snapshot,
            fields,
            scheduler_changed: update.touches_scheduler(),
        })
    }
}

async fn write_config(path: &Path, config: &MonitorConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("写入配置文件失败: {:?}", path))?;
    Ok(())
}
