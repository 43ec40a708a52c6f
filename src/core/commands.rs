//! 宿主命令面：命令面板 / 快捷键触发的操作
//!
//! 与 UI 消息不同，这些入口由宿主直接调用并同步拿到结果（Result），失败时由调用方决定如何提示。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::error::PreviewError;
use super::orchestrator::{end_quietly, Orchestrator};
use crate::agent;
use crate::gateway::{AgentSummary, OutboundMessage};
use crate::runtime::EndReason;

/// 已知宿主命令 id
pub mod ids {
    pub const REFRESH_AGENTS: &str = "agentview.refreshAgents";
    pub const RESET_AGENT_VIEW: &str = "agentview.resetAgentView";
    pub const CLEAR_HISTORY: &str = "agentview.clearHistory";
    pub const TOGGLE_DEBUG_MODE: &str = "agentview.toggleDebugMode";
    pub const EXPORT_CONVERSATION: &str = "agentview.exportConversation";
}

impl Orchestrator {
    /// 预选 Agent 并通知 UI（不启动会话）
    pub async fn set_agent_id(&self, agent_id: &str) -> Result<(), PreviewError> {
        let ui = self.require_view().await?;
        agent::resolve(agent_id)?;
        self.preselect(Some(agent_id.to_string())).await;
        ui.post(OutboundMessage::SelectAgent {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// 预选后立即启动
    pub async fn select_and_start_agent(
        self: &Arc<Self>,
        agent_id: &str,
    ) -> Result<JoinHandle<()>, PreviewError> {
        self.set_agent_id(agent_id).await?;
        self.start_session(Some(agent_id.to_string())).await
    }

    /// 与 UI 的 startSession 同一路径；返回启动后半段的任务句柄
    pub async fn start_session(
        self: &Arc<Self>,
        agent_id: Option<String>,
    ) -> Result<JoinHandle<()>, PreviewError> {
        let ui = self.require_view().await?;
        let attempt = self.begin_start(&ui, agent_id).await?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.complete_start(ui, attempt).await }))
    }

    pub async fn end_active_session(&self) -> Result<(), PreviewError> {
        let ui = self.require_view().await?;
        self.end_session(&ui).await;
        Ok(())
    }

    /// 结束会话、清空选中 Agent 与客户端应用缓存，重新发现 Agent
    pub async fn refresh_available_agents(self: &Arc<Self>) -> Result<JoinHandle<()>, PreviewError> {
        let ui = self.require_view().await?;
        if self.is_busy().await {
            self.end_session(&ui).await;
        }
        {
            let mut st = self.state.lock().await;
            st.current_agent_id = None;
            st.agent_name = None;
            st.preselected_agent_id = None;
        }
        self.context.set_context(crate::host::keys::AGENT_SELECTED, false);
        self.client_apps.refresh().await;
        ui.post(OutboundMessage::SelectAgent {
            agent_id: String::new(),
        });

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.discover_agents(&ui).await }))
    }

    /// 结束当前会话、清屏并重新加载当前 Agent 的历史
    pub async fn reset_current_agent_view(&self) -> Result<(), PreviewError> {
        let ui = self.require_view().await?;
        let agent_id = self
            .state
            .lock()
            .await
            .target_agent_id()
            .ok_or(PreviewError::NoAgentSelected)?;

        if self.is_busy().await {
            self.end_session(&ui).await;
        }
        ui.post(OutboundMessage::ClearMessages);
        self.load_agent_history(&ui, &agent_id).await;
        Ok(())
    }

    /// 把当前 Agent 的对话导出为 Markdown，返回文件路径
    pub async fn export_conversation(&self, dest_dir: Option<&Path>) -> Result<PathBuf, PreviewError> {
        let agent_id = self
            .state
            .lock()
            .await
            .target_agent_id()
            .ok_or(PreviewError::NoAgentSelected)?;
        let identity = agent::classify(&agent_id);
        let dir = dest_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.app.export_dir());
        let path = self.history.export_markdown(&identity, &dir).await?;
        tracing::info!("Exported conversation of {} to {}", agent_id, path.display());
        Ok(path)
    }

    /// 删除当前 Agent 的对话与追踪记录
    pub async fn clear_history(&self) -> Result<(), PreviewError> {
        let agent_id = self
            .state
            .lock()
            .await
            .target_agent_id()
            .ok_or(PreviewError::NoAgentSelected)?;
        self.history.clear(&agent::classify(&agent_id)).await?;
        if let Some(ui) = self.view().await {
            ui.post(OutboundMessage::NoHistoryFound { agent_id });
        }
        Ok(())
    }

    pub async fn toggle_debug_mode(&self) -> bool {
        let next = !self.preferences.is_debug_mode();
        self.apply_debug_mode(&Value::Bool(next)).await.unwrap_or(next)
    }

    /// 命令面板的 Agent 列表（不与 UI 交互选择客户端应用）
    pub async fn get_agents_for_command_palette(&self) -> Vec<AgentSummary> {
        let connection = match self.client_apps.current().await {
            Some(conn) => Some(conn),
            None => self.client_apps.require_connection().await.ok(),
        };
        self.collect_agents(connection.as_ref(), None).await
    }

    /// UI 的 executeCommand：已知 id 在本地处理，其余转交宿主
    pub(crate) async fn execute_command(
        self: &Arc<Self>,
        command: &str,
        args: Vec<Value>,
    ) -> Result<(), PreviewError> {
        match command {
            ids::REFRESH_AGENTS => {
                self.refresh_available_agents().await?;
            }
            ids::RESET_AGENT_VIEW => self.reset_current_agent_view().await?,
            ids::CLEAR_HISTORY => self.clear_history().await?,
            ids::TOGGLE_DEBUG_MODE => {
                self.toggle_debug_mode().await;
            }
            ids::EXPORT_CONVERSATION => {
                let dest = args.first().and_then(Value::as_str).map(PathBuf::from);
                self.export_conversation(dest.as_deref()).await?;
            }
            other => {
                self.commands
                    .execute(other, args)
                    .await
                    .map_err(|reason| PreviewError::CommandFailed {
                        command: other.to_string(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }

    /// 进程退出前结束活动会话
    pub async fn shutdown(&self) {
        let handle = {
            let mut st = self.state.lock().await;
            st.next_generation();
            st.pending = None;
            st.handle.take()
        };
        if let Some(handle) = handle {
            end_quietly(&handle, EndReason::UserRequest).await;
        }
        tracing::info!("Orchestrator shut down");
    }
}
