//! AgentView - Agent 预览面板的会话编排与消息协议
//!
//! 模块划分：
//! - **agent**: Agent 身份分类/校验、客户端应用（连接上下文）解析
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态机、编排器、错误归类、宿主命令
//! - **gateway**: 与嵌入式 UI 之间的 `{command, data}` 消息协议与通道
//! - **host**: 宿主接缝（连接、键值存储、上下文标志、命令执行）及默认实现
//! - **memory**: 对话/追踪历史与进程级偏好
//! - **observability**: 日志初始化
//! - **runtime**: Agent 运行时 SDK 抽象与 Mock 实现

pub mod agent;
pub mod config;
pub mod core;
pub mod gateway;
pub mod host;
pub mod memory;
pub mod observability;
pub mod runtime;

pub use crate::core::{Orchestrator, OrchestratorBuilder, PreviewError};
