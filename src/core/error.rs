//! 预览错误类型
//!
//! 校验类错误（InvalidAgentId / NoAgentSelected / ViewNotReady）直接返回给宿主命令调用方；
//! 运行时与会话类错误在消息处理边界被捕获、经 classifier 归类后以 `error` 消息发往 UI。

use thiserror::Error;

/// 编排器及其协作组件可能产生的错误
#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Invalid agent id: {0}")]
    InvalidAgentId(String),

    #[error("No agent selected")]
    NoAgentSelected,

    #[error("Agent view is not ready")]
    ViewNotReady,

    #[error("No file path found for local agent: {0}")]
    NoFilePathForLocalAgent(String),

    #[error("Failed to resolve connection: {0}")]
    ConnectionResolutionFailed(String),

    #[error("{0}")]
    RuntimeStartFailed(String),

    #[error("{0}")]
    RuntimeSendFailed(String),

    #[error("Failed to end session: {0}")]
    RuntimeEndFailed(String),

    /// 调试产物落盘失败：单独上报，不影响已送达的对话结果
    #[error("Failed to save debug log: {0}")]
    DebugArtifactPersistFailed(String),

    #[error("Error selecting client app: {0}")]
    ClientAppSelectionFailed(String),

    #[error("Command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PreviewError {
    /// 是否属于应同步抛给宿主命令的校验类错误
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PreviewError::InvalidAgentId(_)
                | PreviewError::NoAgentSelected
                | PreviewError::ViewNotReady
                | PreviewError::NoFilePathForLocalAgent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_app_message_prefix() {
        let err = PreviewError::ClientAppSelectionFailed("token expired".to_string());
        assert_eq!(err.to_string(), "Error selecting client app: token expired");
    }

    #[test]
    fn test_validation_split() {
        assert!(PreviewError::NoAgentSelected.is_validation());
        assert!(PreviewError::InvalidAgentId("x".into()).is_validation());
        assert!(!PreviewError::RuntimeStartFailed("boom".into()).is_validation());
    }
}
