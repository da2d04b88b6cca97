// SQLite 检测记录存储实现

use super::DetectionRepository;
use crate::storage::config::device_name;
use crate::storage::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

/// SQLite 数据库实现
pub struct SqliteRepository {
    pool: SqlitePool,
    db_path: String,
    device_name: String,
}

impl SqliteRepository {
    /// 创建新的 SQLite 数据库连接
    pub async fn new(db_path: &str) -> Result<Self> {
        info!("初始化 SQLite 数据库: {}", db_path);

        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .idle_timeout(std::time::Duration::from_secs(180))
            .max_lifetime(std::time::Duration::from_secs(1800))
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await?;

        let repo = Self {
            pool,
            db_path: db_path.to_string(),
            device_name: device_name(),
        };

        repo.initialize_tables().await?;

        Ok(repo)
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS detection_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp DATETIME NOT NULL,
                image_path TEXT NOT NULL,
                is_valid BOOLEAN NOT NULL,
                issues TEXT,
                should_notify BOOLEAN NOT NULL DEFAULT 0,
                analysis_json TEXT NOT NULL,
                device_name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_detection_timestamp ON detection_records(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_by_date(&self, date: NaiveDate) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM detection_records WHERE DATE(timestamp) = ?",
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count"))
    }
}

#[async_trait]
impl DetectionRepository for SqliteRepository {
    async fn save(&self, detection: &NewDetection) -> Result<i64> {
        let issues_json = serde_json::to_string(&detection.issues)?;
        let analysis_json = serde_json::to_string(&detection.analysis)?;

        let result = sqlx::query(
            r#"
            INSERT INTO detection_records
                (timestamp, image_path, is_valid, issues, should_notify, analysis_json, device_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(local_now())
        .bind(&detection.image_path)
        .bind(detection.is_valid)
        .bind(issues_json)
        .bind(detection.should_notify)
        .bind(analysis_json)
        .bind(&self.device_name)
        .execute(&self.pool)
        .await?;

        info!(
            "保存检测记录: is_valid={}, issues={}",
            detection.is_valid,
            detection.issues.len()
        );
        Ok(result.last_insert_rowid())
    }

    async fn get_by_date(&self, date: NaiveDate) -> Result<Vec<DetectionRecord>> {
        let rows = sqlx::query_as::<_, DetectionRow>(
            r#"
            SELECT id, timestamp, image_path, is_valid, issues,
                   should_notify, analysis_json, device_name
            FROM detection_records
            WHERE DATE(timestamp) = ?
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DetectionRecord::from).collect())
    }

    async fn get_status(&self) -> Result<StorageStatus> {
        let total = sqlx::query("SELECT COUNT(*) AS total FROM detection_records")
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("total");
        let today = self.count_by_date(local_now().date_naive()).await?;

        Ok(StorageStatus {
            db_path: self.db_path.clone(),
            total_records: total,
            today_records: today,
        })
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let paths: Vec<String> =
            sqlx::query("SELECT image_path FROM detection_records WHERE timestamp < ?")
                .bind(cutoff)
                .fetch_all(&mut *tx)
                .await?
                .iter()
                .map(|row| row.get::<String, _>("image_path"))
                .collect();

        sqlx::query("DELETE FROM detection_records WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(paths)
    }
}
