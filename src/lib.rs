// 学习状态监控 - 主库

// 声明模块
pub mod actors;
pub mod analyzer;
pub mod app;
pub mod camera;
pub mod commands;
pub mod config;
pub mod console;
pub mod event_bus;
pub mod logger;
pub mod messenger;
pub mod models;
pub mod monitor;
pub mod settings;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use app::MonitorApp;
use config::AppConfig;
use console::ConsoleCommand;
use event_bus::MonitorEvent;
use logger::{LogBroadcaster, RecentLogs};

/// 命令行参数（其余配置来自环境变量）
#[derive(Parser, Debug)]
#[command(author, version, about = "摄像头学习状态监控")]
pub struct Args {
    /// 启动后立即开始监控
    #[arg(short, long)]
    pub start: bool,
}

/// 程序入口：初始化日志、组装应用并运行控制台，直到 quit 或 Ctrl-C
pub fn run() -> Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(args))
}

async fn run_async(args: Args) -> Result<()> {
    // 创建日志广播器并初始化日志系统
    let log_broadcaster = Arc::new(LogBroadcaster::new(1000));
    logger::init(&config::data_dir_from_env(), log_broadcaster.clone())?;
    let recent_logs = Arc::new(RecentLogs::new(200));
    recent_logs.clone().spawn_collector(&log_broadcaster);

    let config = AppConfig::from_env()?;
    let app = MonitorApp::initialize(&config).await?;
    app.start_background().await;
    spawn_event_printer(&app);

    if args.start {
        info!("命令行要求立即启动监控");
        if let Err(e) = commands::start_monitor(&app).await {
            warn!("启动监控失败: {}", e);
        }
    }

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // 标准输入关闭：等待 Ctrl-C
                    Ok(None) => {
                        let _ = tokio::signal::ctrl_c().await;
                        break;
                    }
                    Err(e) => {
                        error!("读取控制台输入失败: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => match console::execute(&app, &recent_logs, command).await {
                        Ok(output) => println!("{}", output),
                        Err(e) => println!("错误: {}", e),
                    },
                    Err(e) => println!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("收到 Ctrl-C");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

/// 在控制台上提示关键事件
fn spawn_event_printer(app: &MonitorApp) {
    let mut rx = app.events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(MonitorEvent::MonitorStopped { reason }) => {
                    println!(">> 监控已停止（{}）", reason)
                }
                Ok(MonitorEvent::NotificationSent { level, text_ok, image_ok }) => {
                    println!(">> 已发送 {} 通知（文本: {}, 图片: {}）", level, text_ok, image_ok)
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        assert!(!Args::try_parse_from(["study-monitor"]).unwrap().start);
        assert!(Args::try_parse_from(["study-monitor", "--start"]).unwrap().start);
        assert!(Args::try_parse_from(["study-monitor", "-s"]).unwrap().start);
        // 拼错的参数报错而不是被忽略
        assert!(Args::try_parse_from(["study-monitor", "--strat"]).is_err());
    }
}
