//! Agent 运行时 SDK 接缝：trait 定义与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::MockRuntime;
pub use traits::{
    AgentRuntime, AgentSession, BotRecord, DebugArtifact, EndReason, EventStream, LifecycleEvent,
    LocalAgentFile, RuntimeMessage, SendResponse, SessionKind, SessionTarget, StartResponse,
};
