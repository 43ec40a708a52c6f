//! Agent 运行时 SDK 抽象
//!
//! 编译、会话模拟、追踪计算均由外部 SDK 完成，这里只定义调用面：
//! AgentRuntime 负责打开会话、列出 Agent、提供生命周期事件流；AgentSession 负责 start/send/end/trace。

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentIdentity;
use crate::host::Connection;

/// 会话种类：创建时确定，不在使用时靠类型推断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// 本地脚本 Agent 的模拟会话
    Simulate,
    /// 已发布 Agent 的预览会话
    Preview,
}

impl SessionKind {
    pub fn for_identity(identity: &AgentIdentity) -> Self {
        match identity {
            AgentIdentity::Local { .. } => SessionKind::Simulate,
            AgentIdentity::Published { .. } => SessionKind::Preview,
        }
    }
}

/// 打开会话所需的全部上下文
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub identity: AgentIdentity,
    pub kind: SessionKind,
    pub connection: Option<Connection>,
    /// Live 模式：本地 Agent 调用真实动作而非模拟动作
    pub live_mode: bool,
    pub debug_mode: bool,
}

/// 运行时返回的单条消息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StartResponse {
    pub session_id: String,
    pub messages: Vec<RuntimeMessage>,
}

impl StartResponse {
    /// 首条带内容的消息（欢迎语）
    pub fn initial_content(&self) -> Option<String> {
        primary_content(&self.messages)
    }
}

/// 下游调试产物（如动作执行日志）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugArtifact {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct SendResponse {
    pub messages: Vec<RuntimeMessage>,
    pub plan_id: Option<String>,
    pub debug_artifact: Option<DebugArtifact>,
}

impl SendResponse {
    /// 主消息内容；缺失时为 None，从不编造占位文本
    pub fn primary_content(&self) -> Option<String> {
        primary_content(&self.messages)
    }
}

fn primary_content(messages: &[RuntimeMessage]) -> Option<String> {
    messages
        .iter()
        .find_map(|m| m.message.clone().filter(|s| !s.is_empty()))
}

/// 结束会话的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    UserRequest,
    /// 被新的 startSession 取代
    Superseded,
    /// 启动过程中被取消，会话成了孤儿
    Cancelled,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::UserRequest => "UserRequest",
            EndReason::Superseded => "Superseded",
            EndReason::Cancelled => "Cancelled",
        }
    }
}

/// 运行时生命周期事件（`agents:compiling` / `agents:simulation-starting`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Compiling {
        message: Option<String>,
        error: Option<String>,
    },
    SimulationStarting {
        message: Option<String>,
    },
}

/// 已发布 Agent 记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct BotRecord {
    pub id: String,
    pub developer_name: String,
    #[serde(default)]
    pub master_label: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl BotRecord {
    pub fn label(&self) -> &str {
        self.master_label.as_deref().unwrap_or(&self.developer_name)
    }
}

/// 项目中可预览的本地脚本 Agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAgentFile {
    pub name: String,
    pub path: PathBuf,
}

pub type EventStream = Pin<Box<dyn Stream<Item = LifecycleEvent> + Send>>;

/// 运行时创建的会话对象
#[async_trait]
pub trait AgentSession: Send + Sync {
    async fn start(&self) -> Result<StartResponse, String>;

    async fn send(&self, session_id: &str, text: &str) -> Result<SendResponse, String>;

    async fn end(&self, session_id: &str, reason: EndReason) -> Result<(), String>;

    async fn trace(&self, session_id: &str, plan_id: &str) -> Result<Value, String>;

    /// 开关调试产物捕获
    fn set_debug_mode(&self, enabled: bool);
}

/// 运行时 SDK 入口
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// 编译/准备会话对象（尚未 start）
    async fn open_session(&self, target: &SessionTarget) -> Result<Arc<dyn AgentSession>, String>;

    async fn list_remote_agents(&self, connection: &Connection) -> Result<Vec<BotRecord>, String>;

    async fn list_previewable_agents(
        &self,
        connection: Option<&Connection>,
        project_root: &Path,
    ) -> Result<Vec<LocalAgentFile>, String>;

    /// 订阅生命周期事件；每次调用得到独立的流
    fn events(&self) -> EventStream;
}
