//! UI 网关：消息协议与通道
//!
//! 编排器与嵌入式 UI 之间只通过序列化的 `{command, data}` 信封交换信息。

mod channel;
mod message;

pub use channel::{spawn_json_reader, spawn_json_writer, UiChannel};
pub use message::{AgentSummary, DecodeError, Envelope, InboundMessage, OutboundMessage};
