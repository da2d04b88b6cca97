//! 控制命令模块
//!
//! 控制台（以及任何外部控制面）调用的命令接口，按功能分组：
//! - control: 监控、调度器与预览控制
//! - config: 监控配置读取与更新
//! - query: 检测记录与存储状态查询
//!
//! 所有命令返回 `Result<T, String>`，错误已转换为可直接展示的文本

pub mod config;
pub mod control;
pub mod query;

pub use config::*;
pub use control::*;
pub use query::*;
