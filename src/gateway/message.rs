//! 宿主与 UI 之间的消息协议
//!
//! 线上格式固定为 `{ "command": string, "data"?: object }`，双方不共享内存。
//! 入站消息在接收后立即解码为 [`InboundMessage`]；出站消息由 [`OutboundMessage`]
//! 以相邻标签（command + data）序列化，保持与 UI 的线上格式兼容。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentSource;
use crate::memory::{ConversationMessage, TraceEntry};

/// 线上信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// 可供选择的 Agent（availableAgents / 命令面板）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source: AgentSource,
}

/// UI -> 编排器
#[derive(Debug, Clone)]
pub enum InboundMessage {
    StartSession { agent_id: Option<String> },
    SendChatMessage { message: String },
    EndSession,
    GetAvailableAgents,
    ClientAppSelected { client_app_name: String },
    LoadAgentHistory { agent_id: String },
    GetTraceData,
    /// 原始负载，非布尔值由偏好存储静默忽略
    SetApexDebugging { value: Value },
    SetLiveMode { value: Value },
    GetInitialLiveMode,
    GetConfiguration { section: String },
    SetSelectedAgentId { agent_id: Option<String> },
    ExecuteCommand { command: String, args: Vec<Value> },
    Unknown { command: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionData {
    agent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SendChatMessageData {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientAppSelectedData {
    #[serde(default)]
    client_app_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentIdData {
    agent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigurationData {
    #[serde(default)]
    section: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteCommandData {
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// 消息解码失败（命令已知但负载格式不对）
#[derive(Debug, thiserror::Error)]
#[error("Malformed payload for '{command}': {source}")]
pub struct DecodeError {
    pub command: String,
    #[source]
    pub source: serde_json::Error,
}

fn payload<T: DeserializeOwned + Default>(command: &str, data: Option<Value>) -> Result<T, DecodeError> {
    match data {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v).map_err(|source| DecodeError {
            command: command.to_string(),
            source,
        }),
    }
}

/// 布尔开关既可能是裸值，也可能包在对象里（如 `{ "enabled": true }`）
fn flag_value(data: Option<Value>, key: &str) -> Value {
    match data {
        Some(Value::Object(mut map)) => map.remove(key).unwrap_or(Value::Null),
        Some(other) => other,
        None => Value::Null,
    }
}

impl InboundMessage {
    pub fn decode(envelope: Envelope) -> Result<Self, DecodeError> {
        let Envelope { command, data } = envelope;
        let msg = match command.as_str() {
            "startSession" => {
                let d: StartSessionData = payload(&command, data)?;
                InboundMessage::StartSession {
                    agent_id: d.agent_id.filter(|s| !s.is_empty()),
                }
            }
            "sendChatMessage" => {
                let d: SendChatMessageData = payload(&command, data)?;
                InboundMessage::SendChatMessage { message: d.message }
            }
            "endSession" => InboundMessage::EndSession,
            "getAvailableAgents" => InboundMessage::GetAvailableAgents,
            "clientAppSelected" => {
                let d: ClientAppSelectedData = payload(&command, data)?;
                InboundMessage::ClientAppSelected {
                    client_app_name: d.client_app_name,
                }
            }
            "loadAgentHistory" => {
                let d: AgentIdData = payload(&command, data)?;
                InboundMessage::LoadAgentHistory {
                    agent_id: d.agent_id.unwrap_or_default(),
                }
            }
            "getTraceData" => InboundMessage::GetTraceData,
            "setApexDebugging" => InboundMessage::SetApexDebugging {
                value: flag_value(data, "enabled"),
            },
            "setLiveMode" => InboundMessage::SetLiveMode {
                value: flag_value(data, "isLiveMode"),
            },
            "getInitialLiveMode" => InboundMessage::GetInitialLiveMode,
            "getConfiguration" => {
                let d: ConfigurationData = payload(&command, data)?;
                InboundMessage::GetConfiguration { section: d.section }
            }
            "setSelectedAgentId" => {
                let d: AgentIdData = payload(&command, data)?;
                InboundMessage::SetSelectedAgentId {
                    agent_id: d.agent_id.filter(|s| !s.is_empty()),
                }
            }
            "executeCommand" => {
                let d: ExecuteCommandData = payload(&command, data)?;
                InboundMessage::ExecuteCommand {
                    command: d.command,
                    args: d.args,
                }
            }
            _ => InboundMessage::Unknown { command },
        };
        Ok(msg)
    }

    /// 直接从 JSON 文本解码
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(|source| DecodeError {
            command: "<envelope>".to_string(),
            source,
        })?;
        Self::decode(envelope)
    }
}

/// 编排器 -> UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", content = "data", rename_all = "camelCase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    SessionStarting { agent_id: String, agent_name: String },
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    SessionEnded,
    ClearMessages,
    MessageStarting,
    MessageSent {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Error { message: String },
    CompilationStarting {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    CompilationError {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    SimulationStarting {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AvailableAgents {
        agents: Vec<AgentSummary>,
        selected_agent_id: Option<String>,
    },
    ClientAppRequired {
        message: String,
        username: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SelectClientApp { client_apps: Vec<String> },
    #[serde(rename_all = "camelCase")]
    ClientAppReady { client_app_name: String },
    #[serde(rename_all = "camelCase")]
    ConversationHistory {
        agent_id: String,
        messages: Vec<ConversationMessage>,
    },
    #[serde(rename_all = "camelCase")]
    TraceHistory {
        agent_id: String,
        entries: Vec<TraceEntry>,
    },
    TraceData { entry: Option<TraceEntry> },
    #[serde(rename_all = "camelCase")]
    NoHistoryFound { agent_id: String },
    Configuration { section: String, value: Value },
    #[serde(rename_all = "camelCase")]
    SetLiveMode { is_live_mode: bool },
    DebugLogError { message: String },
    #[serde(rename_all = "camelCase")]
    SelectAgent { agent_id: String },
    DebugModeChanged { enabled: bool },
}

impl OutboundMessage {
    /// 线上 command 名称（日志与测试用）
    pub fn command(&self) -> &'static str {
        match self {
            OutboundMessage::SessionStarting { .. } => "sessionStarting",
            OutboundMessage::SessionStarted { .. } => "sessionStarted",
            OutboundMessage::SessionEnded => "sessionEnded",
            OutboundMessage::ClearMessages => "clearMessages",
            OutboundMessage::MessageStarting => "messageStarting",
            OutboundMessage::MessageSent { .. } => "messageSent",
            OutboundMessage::Error { .. } => "error",
            OutboundMessage::CompilationStarting { .. } => "compilationStarting",
            OutboundMessage::CompilationError { .. } => "compilationError",
            OutboundMessage::SimulationStarting { .. } => "simulationStarting",
            OutboundMessage::AvailableAgents { .. } => "availableAgents",
            OutboundMessage::ClientAppRequired { .. } => "clientAppRequired",
            OutboundMessage::SelectClientApp { .. } => "selectClientApp",
            OutboundMessage::ClientAppReady { .. } => "clientAppReady",
            OutboundMessage::ConversationHistory { .. } => "conversationHistory",
            OutboundMessage::TraceHistory { .. } => "traceHistory",
            OutboundMessage::TraceData { .. } => "traceData",
            OutboundMessage::NoHistoryFound { .. } => "noHistoryFound",
            OutboundMessage::Configuration { .. } => "configuration",
            OutboundMessage::SetLiveMode { .. } => "setLiveMode",
            OutboundMessage::DebugLogError { .. } => "debugLogError",
            OutboundMessage::SelectAgent { .. } => "selectAgent",
            OutboundMessage::DebugModeChanged { .. } => "debugModeChanged",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_start_session_without_data() {
        let msg = InboundMessage::from_json(r#"{"command":"startSession"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::StartSession { agent_id: None }));
    }

    #[test]
    fn test_decode_start_session_with_agent() {
        let msg = InboundMessage::from_json(
            r#"{"command":"startSession","data":{"agentId":"0Xx000000000001"}}"#,
        )
        .unwrap();
        assert!(
            matches!(msg, InboundMessage::StartSession { agent_id: Some(ref id) } if id == "0Xx000000000001")
        );
    }

    #[test]
    fn test_decode_flag_payload_shapes() {
        let bare = InboundMessage::from_json(r#"{"command":"setApexDebugging","data":true}"#).unwrap();
        assert!(matches!(bare, InboundMessage::SetApexDebugging { value: Value::Bool(true) }));

        let wrapped =
            InboundMessage::from_json(r#"{"command":"setLiveMode","data":{"isLiveMode":false}}"#).unwrap();
        assert!(matches!(wrapped, InboundMessage::SetLiveMode { value: Value::Bool(false) }));

        let junk = InboundMessage::from_json(r#"{"command":"setLiveMode","data":"yes"}"#).unwrap();
        assert!(matches!(junk, InboundMessage::SetLiveMode { value: Value::String(_) }));
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        let unknown = InboundMessage::from_json(r#"{"command":"dance"}"#).unwrap();
        assert!(matches!(unknown, InboundMessage::Unknown { ref command } if command == "dance"));

        let malformed = InboundMessage::from_json(r#"{"command":"sendChatMessage","data":{"message":42}}"#);
        assert!(malformed.is_err());
    }

    #[test]
    fn test_outbound_wire_shape() {
        let v = serde_json::to_value(OutboundMessage::SessionEnded).unwrap();
        assert_eq!(v, json!({"command": "sessionEnded"}));

        let v = serde_json::to_value(OutboundMessage::MessageSent { content: None }).unwrap();
        assert_eq!(v, json!({"command": "messageSent", "data": {}}));

        let v = serde_json::to_value(OutboundMessage::SetLiveMode { is_live_mode: true }).unwrap();
        assert_eq!(v, json!({"command": "setLiveMode", "data": {"isLiveMode": true}}));

        let msg = OutboundMessage::SelectAgent { agent_id: String::new() };
        assert_eq!(serde_json::to_value(&msg).unwrap()["command"], msg.command());
    }

    #[test]
    fn test_agent_summary_wire_shape() {
        let summary: AgentSummary = serde_json::from_value(json!({
            "id": "0Xx000000000001",
            "name": "Support Bot",
            "type": "published"
        }))
        .unwrap();
        assert_eq!(summary.source, AgentSource::Published);
        assert_eq!(serde_json::to_value(&summary).unwrap()["type"], json!("published"));
    }
}
