//! 核心编排层：错误归类、会话状态、编排器与宿主命令

pub mod builder;
pub mod classifier;
pub mod commands;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::PreviewError;
pub use orchestrator::Orchestrator;
pub use state::{SessionPhase, SessionState};
