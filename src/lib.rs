//! 在办小助手（zaiban）- 待办与记账对话助手
//!
//! 模块划分：
//! - **agent**: Assistant 边界（命令、附件会话、历史、错误转文字）
//! - **command**: 系统命令解析与执行
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与单回合编排循环
//! - **gateway**: 有界工作池（排队、并发上限、同用户串行）
//! - **integrations**: HTTP 接入（feature `server`）
//! - **llm**: 模型客户端抽象、OpenAI 兼容实现、Mock、模型注册表
//! - **memory**: 对话历史窗口与附件会话
//! - **planning**: 每日规划推送
//! - **prompts**: 提示词模板
//! - **services**: 待办 / 记账服务（内存与 SQLite）
//! - **text**: 回复 Markdown 清理
//! - **tools**: 工具注册、调度、模糊匹配与内置工具

pub mod agent;
pub mod command;
pub mod config;
pub mod core;
pub mod gateway;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;
pub mod prompts;
pub mod services;
pub mod text;
pub mod tools;

pub use agent::{create_assistant, Assistant, Inbound, TurnHandler};
pub use config::{load_config, AppConfig};
