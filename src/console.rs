// 控制台 - 从标准输入读取命令并调用控制命令

use std::sync::Arc;

use serde::Serialize;

use crate::app::MonitorApp;
use crate::commands;
use crate::logger::RecentLogs;

pub const HELP: &str = "命令:
  start              启动监控
  stop               停止监控
  status             查看监控状态
  config             查看监控配置
  set <json>         部分更新配置，如 set {\"capture_interval\": 60}
  today              今天的检测记录
  storage            存储状态
  scheduler on|off   启动/停止时间调度器
  preview <id>       以客户端 id 启动预览
  unpreview [id]     停止预览
  camera             摄像头状态
  health             健康检查
  test               测试视觉模型 API 连接
  logs [n]           最近 n 条日志（默认 20）
  help               显示帮助
  quit               退出";

/// 控制台命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Status,
    Config,
    Set(String),
    Today,
    Storage,
    Scheduler(bool),
    Preview(String),
    Unpreview(Option<String>),
    Camera,
    Health,
    TestAnalyzer,
    Logs(usize),
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match (name, rest) {
            ("start", "") => Self::Start,
            ("stop", "") => Self::Stop,
            ("status", "") => Self::Status,
            ("config", "") => Self::Config,
            ("set", json) if !json.is_empty() => Self::Set(json.to_string()),
            ("today", "") => Self::Today,
            ("storage", "") => Self::Storage,
            ("scheduler", "on") => Self::Scheduler(true),
            ("scheduler", "off") => Self::Scheduler(false),
            ("preview", id) if !id.is_empty() => Self::Preview(id.to_string()),
            ("unpreview", "") => Self::Unpreview(None),
            ("unpreview", id) => Self::Unpreview(Some(id.to_string())),
            ("camera", "") => Self::Camera,
            ("health", "") => Self::Health,
            ("test", "") => Self::TestAnalyzer,
            ("logs", "") => Self::Logs(20),
            ("logs", n) => Self::Logs(n.parse().map_err(|_| format!("无效的条数: {}", n))?),
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => return Err(format!("未知命令: {}（输入 help 查看帮助）", line)),
        };
        Ok(command)
    }
}

fn pretty<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

/// 执行一条命令，返回要打印的文本
pub async fn execute(
    app: &MonitorApp,
    logs: &Arc<RecentLogs>,
    command: ConsoleCommand,
) -> Result<String, String> {
    match command {
        ConsoleCommand::Start => commands::start_monitor(app).await.map(|_| "监控已启动".into()),
        ConsoleCommand::Stop => commands::stop_monitor(app).await.map(|_| "监控已停止".into()),
        ConsoleCommand::Status => pretty(&commands::get_status(app).await?),
        ConsoleCommand::Config => pretty(&commands::get_config(app).await?),
        ConsoleCommand::Set(json) => pretty(&commands::update_config(app, &json).await?),
        ConsoleCommand::Today => {
            let records = commands::get_today_records(app).await?;
            let lines: Vec<String> = records
                .iter()
                .map(|r| {
                    format!(
                        "#{} {} {} {}",
                        r.id,
                        r.timestamp.format("%H:%M:%S"),
                        if r.is_valid { "OK" } else { "FAIL" },
                        r.issues.join("; ")
                    )
                })
                .collect();
            Ok(format!("今天共 {} 条记录\n{}", records.len(), lines.join("\n")))
        }
        ConsoleCommand::Storage => pretty(&commands::get_storage_status(app).await?),
        ConsoleCommand::Scheduler(true) => commands::start_scheduler(app)
            .await
            .map(|_| "时间调度器已启动".into()),
        ConsoleCommand::Scheduler(false) => commands::stop_scheduler(app)
            .await
            .map(|_| "时间调度器已停止".into()),
        ConsoleCommand::Preview(id) => commands::start_preview(app, &id)
            .await
            .map(|_| format!("预览已启动（客户端 {}）", id)),
        ConsoleCommand::Unpreview(id) => commands::stop_preview(app, id.as_deref())
            .await
            .map(|_| "预览已停止".into()),
        ConsoleCommand::Camera => pretty(&commands::get_camera_status(app).await?),
        ConsoleCommand::Health => pretty(&commands::health_check(app).await?),
        ConsoleCommand::TestAnalyzer => commands::test_analyzer(app)
            .await
            .map(|_| "视觉模型 API 连接正常".into()),
        ConsoleCommand::Logs(n) => Ok(logs
            .latest(n)
            .iter()
            .map(|l| format!("{} {:>5} {}", l.timestamp, l.level, l.message))
            .collect::<Vec<_>>()
            .join("\n")),
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Quit => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::test_app;
    use tempfile::tempdir;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse(" start "), Ok(ConsoleCommand::Start));
        assert_eq!(
            ConsoleCommand::parse(r#"set {"capture_interval": 60}"#),
            Ok(ConsoleCommand::Set(r#"{"capture_interval": 60}"#.into()))
        );
        assert_eq!(
            ConsoleCommand::parse("scheduler off"),
            Ok(ConsoleCommand::Scheduler(false))
        );
        assert_eq!(
            ConsoleCommand::parse("unpreview"),
            Ok(ConsoleCommand::Unpreview(None))
        );
        assert_eq!(ConsoleCommand::parse("logs 5"), Ok(ConsoleCommand::Logs(5)));
        assert_eq!(ConsoleCommand::parse("exit"), Ok(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::parse("health"), Ok(ConsoleCommand::Health));
        assert_eq!(ConsoleCommand::parse("test"), Ok(ConsoleCommand::TestAnalyzer));

        assert!(ConsoleCommand::parse("set").is_err());
        assert!(ConsoleCommand::parse("logs many").is_err());
        assert!(ConsoleCommand::parse("dance").is_err());
    }

    #[tokio::test]
    async fn test_execute_status_and_config() {
        let dir = tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let logs = Arc::new(RecentLogs::new(10));

        let status = execute(&app, &logs, ConsoleCommand::Status).await.unwrap();
        assert!(status.contains("\"is_monitoring\": false"));

        let config = execute(&app, &logs, ConsoleCommand::Set(r#"{"capture_interval": 45}"#.into()))
            .await
            .unwrap();
        assert!(config.contains("\"capture_interval\": 45"));

        assert!(execute(&app, &logs, ConsoleCommand::Stop).await.is_err());

        let health = execute(&app, &logs, ConsoleCommand::Health).await.unwrap();
        assert!(health.contains("\"status_actor\": true"));
        assert!(execute(&app, &logs, ConsoleCommand::TestAnalyzer).await.is_ok());
    }
}
