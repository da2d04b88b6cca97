// Repository 抽象层 - 定义检测记录的存储接口

pub mod sqlite;

use super::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// 检测记录存储接口
#[async_trait]
pub trait DetectionRepository: Send + Sync {
    /// 保存一条检测记录，返回记录 ID
    async fn save(&self, detection: &NewDetection) -> Result<i64>;

    /// 获取某一天的记录（按时间倒序）
    async fn get_by_date(&self, date: NaiveDate) -> Result<Vec<DetectionRecord>>;

    /// 获取今天的记录
    async fn get_today(&self) -> Result<Vec<DetectionRecord>> {
        self.get_by_date(local_now().date_naive()).await
    }

    /// 存储状态
    async fn get_status(&self) -> Result<StorageStatus>;

    /// 删除截止时间之前的记录，返回被删除记录的图片路径
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}
