// 数据模型定义 - 检测记录

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::models::AnalysisResult;

/// 获取当前本地时间（以 DateTime<Utc> 类型表示，但值为本地时间）
/// 用于将本地时间存储到数据库中
pub fn local_now() -> DateTime<Utc> {
    Local::now().naive_local().and_utc()
}

/// 待保存的检测结果（每个完成的周期一条）
#[derive(Debug, Clone)]
pub struct NewDetection {
    pub image_path: String,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub should_notify: bool,
    pub analysis: AnalysisResult,
}

/// 检测记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    #[serde(serialize_with = "serialize_datetime_as_local")]
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub should_notify: bool,
    pub analysis: AnalysisResult,
    pub device_name: Option<String>,
}

/// 数据库行
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DetectionRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub is_valid: bool,
    pub issues: Option<String>,
    pub should_notify: bool,
    pub analysis_json: String,
    pub device_name: Option<String>,
}

impl From<DetectionRow> for DetectionRecord {
    fn from(row: DetectionRow) -> Self {
        let issues = row
            .issues
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let analysis = serde_json::from_str(&row.analysis_json).unwrap_or_default();

        Self {
            id: row.id,
            timestamp: row.timestamp,
            image_path: row.image_path,
            is_valid: row.is_valid,
            issues,
            should_notify: row.should_notify,
            analysis,
            device_name: row.device_name,
        }
    }
}

/// 存储状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub db_path: String,
    pub total_records: i64,
    pub today_records: i64,
}

/// 自定义序列化：DateTime<Utc> -> 不带时区标记的字符串
fn serialize_datetime_as_local<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    // 数据库中存储的已经是本地时间
    serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_with_bad_json_degrades_to_empty() {
        let row = DetectionRow {
            id: 1,
            timestamp: local_now(),
            image_path: "a.jpg".into(),
            is_valid: false,
            issues: Some("not json".into()),
            should_notify: true,
            analysis_json: "{".into(),
            device_name: None,
        };
        let record = DetectionRecord::from(row);
        assert!(record.issues.is_empty());
        assert!(record.analysis.is_empty());
    }

    #[test]
    fn test_record_serializes_local_timestamp() {
        let record = DetectionRecord {
            id: 1,
            timestamp: chrono::NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap()
                .and_utc(),
            image_path: "a.jpg".into(),
            is_valid: true,
            issues: vec![],
            should_notify: false,
            analysis: AnalysisResult::new().with("at_desk", true),
            device_name: Some("desk-pc".into()),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["timestamp"], "2026-03-02T09:30:00");
        assert_eq!(value["analysis"]["at_desk"], true);
    }
}
