//! 会话编排器：状态机 + 消息分发
//!
//! 持有唯一的 SessionState，负责：
//! - 启动/结束会话，保证任意时刻至多一个 SessionHandle
//! - 在 UI 与运行时之间转发对话、进度与错误
//! - 监听运行时生命周期事件（compiling / simulation-starting）并转告 UI
//!
//! 入站消息按到达顺序处理：短小的前置步骤（改状态、发 clearMessages 等）就地完成，
//! 耗时的运行时调用放到独立任务中，因此后到的 endSession / startSession 可以在旧启动挂起时生效。
//! 每个挂起点恢复后都要比较代际，落后的结果要么丢弃，要么把孤儿会话结束掉。

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::classifier;
use super::error::PreviewError;
use super::state::{PendingStart, Rollback, SessionHandle, SessionPhase, SessionState};
use crate::agent::{self, AgentIdentity, AgentSource, ClientAppResolution, ClientAppResolver};
use crate::config::AppConfig;
use crate::gateway::{AgentSummary, InboundMessage, OutboundMessage, UiChannel};
use crate::host::{keys, CommandExecutor, Connection, ContextSink};
use crate::memory::{
    ConversationMessage, HistoryLookup, HistoryStore, MessageRole, PreferenceStore, TraceEntry,
};
use crate::runtime::{
    AgentRuntime, AgentSession, DebugArtifact, EndReason, LifecycleEvent, SessionKind, SessionTarget,
};

/// 一次启动请求的前置结果，交给 complete_start 继续
pub(crate) struct StartAttempt {
    generation: u64,
    agent_id: String,
    identity: AgentIdentity,
    previous: Option<SessionHandle>,
    rollback: Rollback,
}

pub struct Orchestrator {
    pub(crate) runtime: Arc<dyn AgentRuntime>,
    pub(crate) client_apps: ClientAppResolver,
    pub(crate) history: HistoryStore,
    pub(crate) preferences: PreferenceStore,
    pub(crate) context: Arc<dyn ContextSink>,
    pub(crate) commands: Arc<dyn CommandExecutor>,
    pub(crate) config: AppConfig,
    view: RwLock<Option<UiChannel>>,
    pub(crate) state: Mutex<SessionState>,
}

impl Orchestrator {
    pub(crate) fn new(
        runtime: Arc<dyn AgentRuntime>,
        client_apps: ClientAppResolver,
        history: HistoryStore,
        preferences: PreferenceStore,
        context: Arc<dyn ContextSink>,
        commands: Arc<dyn CommandExecutor>,
        config: AppConfig,
    ) -> Self {
        Self {
            runtime,
            client_apps,
            history,
            preferences,
            context,
            commands,
            config,
            view: RwLock::new(None),
            state: Mutex::new(SessionState::default()),
        }
    }

    // ============================================================================
    // 视图与状态查询
    // ============================================================================

    /// UI 就绪后挂接出站通道
    pub async fn attach_view(&self, ui: UiChannel) {
        *self.view.write().await = Some(ui);
    }

    pub async fn detach_view(&self) {
        *self.view.write().await = None;
    }

    pub(crate) async fn view(&self) -> Option<UiChannel> {
        self.view.read().await.clone()
    }

    pub(crate) async fn require_view(&self) -> Result<UiChannel, PreviewError> {
        self.view().await.ok_or(PreviewError::ViewNotReady)
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase()
    }

    /// 当前是否存在会话句柄（启动中或活动）
    pub async fn has_session(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }

    /// 是否有会话在启动中或活动中（含尚未装上句柄的启动）
    pub async fn is_busy(&self) -> bool {
        self.phase().await != SessionPhase::Idle
    }

    pub async fn current_agent_id(&self) -> Option<String> {
        self.state.lock().await.current_agent_id.clone()
    }

    pub async fn agent_name(&self) -> Option<String> {
        self.state.lock().await.agent_name.clone()
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.state.lock().await.is_current(generation)
    }

    // ============================================================================
    // 主循环与分发
    // ============================================================================

    /// 消费入站消息直到通道关闭
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        while let Some(msg) = inbound.recv().await {
            Arc::clone(&self).dispatch(msg).await;
        }
        tracing::info!("Inbound channel closed, orchestrator loop exiting");
    }

    /// 处理一条入站消息；耗时部分在独立任务中完成，返回其句柄（若有）
    pub async fn dispatch(self: Arc<Self>, msg: InboundMessage) -> Option<JoinHandle<()>> {
        let Some(ui) = self.view().await else {
            tracing::warn!("Message {:?} arrived before the view was attached", msg);
            return None;
        };
        if ui.is_closed() {
            tracing::debug!("View disposed, dropping {:?}", msg);
            return None;
        }

        match msg {
            InboundMessage::StartSession { agent_id } => match self.begin_start(&ui, agent_id).await {
                Ok(attempt) => {
                    let this = Arc::clone(&self);
                    Some(tokio::spawn(async move { this.complete_start(ui, attempt).await }))
                }
                Err(e) => {
                    tracing::warn!("startSession rejected: {}", e);
                    ui.post(OutboundMessage::error(e.to_string()));
                    None
                }
            },
            InboundMessage::SendChatMessage { message } => self.send_chat_message(&ui, message).await,
            InboundMessage::EndSession => {
                self.end_session(&ui).await;
                None
            }
            InboundMessage::GetAvailableAgents => {
                let this = Arc::clone(&self);
                Some(tokio::spawn(async move { this.discover_agents(&ui).await }))
            }
            InboundMessage::ClientAppSelected { client_app_name } => {
                let this = Arc::clone(&self);
                Some(tokio::spawn(async move {
                    this.client_app_selected(&ui, &client_app_name).await
                }))
            }
            InboundMessage::LoadAgentHistory { agent_id } => {
                self.load_agent_history(&ui, &agent_id).await;
                None
            }
            InboundMessage::GetTraceData => {
                self.trace_data(&ui).await;
                None
            }
            InboundMessage::SetApexDebugging { value } => {
                self.apply_debug_mode(&value).await;
                None
            }
            InboundMessage::SetLiveMode { value } => {
                if self.preferences.set_live_mode(&value).await.is_none() {
                    tracing::debug!("Ignoring non-boolean live mode payload: {}", value);
                }
                None
            }
            InboundMessage::GetInitialLiveMode => {
                ui.post(OutboundMessage::SetLiveMode {
                    is_live_mode: self.preferences.is_live_mode(),
                });
                None
            }
            InboundMessage::GetConfiguration { section } => {
                let value = self.config.preview.setting(&section);
                ui.post(OutboundMessage::Configuration { section, value });
                None
            }
            InboundMessage::SetSelectedAgentId { agent_id } => {
                self.preselect(agent_id).await;
                None
            }
            InboundMessage::ExecuteCommand { command, args } => {
                let this = Arc::clone(&self);
                Some(tokio::spawn(async move {
                    if let Err(e) = this.execute_command(&command, args).await {
                        tracing::warn!("Command {} failed: {}", command, e);
                        ui.post(OutboundMessage::error(e.to_string()));
                    }
                }))
            }
            InboundMessage::Unknown { command } => {
                tracing::warn!("Unknown command from UI: {}", command);
                None
            }
        }
    }

    // ============================================================================
    // 启动
    // ============================================================================

    /// 启动前置：确定目标、铸造代际、按序发出 clearMessages 与 sessionStarting。
    /// 在任何运行时调用之前完成。
    pub(crate) async fn begin_start(
        &self,
        ui: &UiChannel,
        agent_id: Option<String>,
    ) -> Result<StartAttempt, PreviewError> {
        let attempt = {
            let mut st = self.state.lock().await;
            let agent_id = agent_id
                .or_else(|| st.preselected_agent_id.clone())
                .ok_or(PreviewError::NoAgentSelected)?;
            let identity = agent::resolve(&agent_id)?;

            let rollback = st.rollback_point();
            let generation = st.next_generation();
            let previous = st.handle.take();
            st.pending = Some(PendingStart {
                identity: identity.clone(),
                generation,
            });
            st.current_agent_id = Some(agent_id.clone());
            st.agent_name = Some(identity.display_name());
            st.plan_id = None;
            st.ending = false;

            StartAttempt {
                generation,
                agent_id,
                identity,
                previous,
                rollback,
            }
        };

        tracing::info!(
            "Starting session for {} (generation {})",
            attempt.agent_id,
            attempt.generation
        );
        ui.post(OutboundMessage::ClearMessages);
        ui.post(OutboundMessage::SessionStarting {
            agent_id: attempt.agent_id.clone(),
            agent_name: attempt.identity.display_name(),
        });
        self.context.set_context(keys::SESSION_STARTING, true);
        self.context.set_context(keys::SESSION_ACTIVE, false);
        Ok(attempt)
    }

    /// 启动后半段：结束旧会话、解析连接、打开并启动新会话。
    /// 每个 await 之后都检查代际，被取代时不发出任何启动结果。
    pub(crate) async fn complete_start(self: Arc<Self>, ui: UiChannel, attempt: StartAttempt) {
        let StartAttempt {
            generation,
            agent_id,
            identity,
            previous,
            rollback,
        } = attempt;

        // 启动中的旧句柄由它自己的任务在恢复时收尾，这里只结束已活动的
        if let Some(prev) = previous {
            end_quietly(&prev, EndReason::Superseded).await;
        }

        let token = CancellationToken::new();
        let relay = self.spawn_lifecycle_relay(ui.clone(), generation, token.clone());

        let kind = SessionKind::for_identity(&identity);
        let connection = match kind {
            SessionKind::Preview => match self.client_apps.require_connection().await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    stop_relay(token, relay).await;
                    self.fail_start(&ui, generation, rollback, e).await;
                    return;
                }
            },
            SessionKind::Simulate => self.client_apps.current().await,
        };
        if !self.is_current(generation).await {
            tracing::debug!("Start generation {} superseded before open", generation);
            stop_relay(token, relay).await;
            return;
        }

        let prefs = self.preferences.snapshot();
        let target = SessionTarget {
            identity: identity.clone(),
            kind,
            connection: connection.clone(),
            live_mode: prefs.is_live_mode,
            debug_mode: prefs.is_debug_mode,
        };
        let session = match self.runtime.open_session(&target).await {
            Ok(s) => s,
            Err(e) => {
                stop_relay(token, relay).await;
                self.fail_start(&ui, generation, rollback, PreviewError::RuntimeStartFailed(e))
                    .await;
                return;
            }
        };

        {
            let mut st = self.state.lock().await;
            if !st.is_current(generation) {
                drop(st);
                tracing::debug!("Start generation {} superseded after open", generation);
                stop_relay(token, relay).await;
                return;
            }
            st.handle = Some(SessionHandle {
                session: Arc::clone(&session),
                session_id: None,
                identity: identity.clone(),
                kind,
                connection,
                starting: true,
                generation,
            });
        }

        let outcome = session.start().await;
        stop_relay(token, relay).await;

        match outcome {
            Ok(response) => {
                let promoted = {
                    let mut st = self.state.lock().await;
                    let current = st.is_current(generation);
                    if current {
                        if let Some(handle) = st.handle.as_mut() {
                            handle.session_id = Some(response.session_id.clone());
                            handle.starting = false;
                        }
                        st.pending = None;
                    }
                    current
                };

                if !promoted {
                    tracing::info!(
                        "Start for {} was cancelled; ending orphaned session {}",
                        agent_id,
                        response.session_id
                    );
                    if let Err(e) = session.end(&response.session_id, EndReason::Cancelled).await {
                        tracing::warn!("{}", PreviewError::RuntimeEndFailed(e));
                    }
                    return;
                }

                self.context.set_context(keys::SESSION_STARTING, false);
                self.context.set_context(keys::SESSION_ACTIVE, true);
                // 启动期间偏好可能已变
                session.set_debug_mode(self.preferences.is_debug_mode());
                let content = response.initial_content();
                tracing::info!("Session {} started for {}", response.session_id, agent_id);
                ui.post(OutboundMessage::SessionStarted {
                    session_id: response.session_id.clone(),
                    content: content.clone(),
                });

                if let Some(text) = content {
                    let message = ConversationMessage::new(MessageRole::Agent, text);
                    if let Err(e) = self
                        .history
                        .append_message(&identity, &response.session_id, &message)
                        .await
                    {
                        tracing::warn!("Failed to record welcome message: {}", e);
                    }
                }
            }
            Err(e) => {
                self.fail_start(&ui, generation, rollback, PreviewError::RuntimeStartFailed(e))
                    .await;
            }
        }
    }

    /// 启动失败：代际仍有效时回滚会话级字段并发出归类后的 error；否则只记日志
    async fn fail_start(&self, ui: &UiChannel, generation: u64, rollback: Rollback, error: PreviewError) {
        {
            let mut st = self.state.lock().await;
            if !st.is_current(generation) {
                tracing::debug!("Dropping failure of superseded start {}: {}", generation, error);
                return;
            }
            st.handle = None;
            st.pending = None;
            st.restore(rollback);
        }
        tracing::warn!("Session start failed: {}", error);
        self.context.set_context(keys::SESSION_STARTING, false);
        self.context.set_context(keys::SESSION_ACTIVE, false);
        ui.post(OutboundMessage::error(classifier::classify(&error.to_string())));
    }

    /// 启动期间转发运行时生命周期事件；代际失效后的事件静默丢弃
    fn spawn_lifecycle_relay(
        self: &Arc<Self>,
        ui: UiChannel,
        generation: u64,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        // 事件流不带会话归属，只能按代际过滤；孤儿启动的事件可能落在新代际下
        let mut events = self.runtime.events();
        tokio::spawn(async move {
            loop {
                // 先排空已到达的事件，再响应停止信号
                let event = tokio::select! {
                    biased;
                    ev = events.next() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                    _ = token.cancelled() => break,
                };
                if !this.is_current(generation).await {
                    tracing::debug!("Dropping lifecycle event from superseded start: {:?}", event);
                    continue;
                }
                ui.post(match event {
                    LifecycleEvent::Compiling {
                        error: Some(error), ..
                    } => OutboundMessage::CompilationError {
                        message: Some(error),
                    },
                    LifecycleEvent::Compiling { message, .. } => {
                        OutboundMessage::CompilationStarting { message }
                    }
                    LifecycleEvent::SimulationStarting { message } => {
                        OutboundMessage::SimulationStarting { message }
                    }
                });
            }
        })
    }

    // ============================================================================
    // 对话
    // ============================================================================

    /// 没有活动会话时什么也不做
    pub(crate) async fn send_chat_message(
        self: &Arc<Self>,
        ui: &UiChannel,
        text: String,
    ) -> Option<JoinHandle<()>> {
        let (session, session_id, identity, generation) = {
            let st = self.state.lock().await;
            let handle = st.active_handle()?;
            (
                Arc::clone(&handle.session),
                handle.session_id.clone()?,
                handle.identity.clone(),
                st.generation,
            )
        };

        ui.post(OutboundMessage::MessageStarting);
        let this = Arc::clone(self);
        let ui = ui.clone();
        Some(tokio::spawn(async move {
            this.relay_chat(ui, session, session_id, identity, generation, text)
                .await
        }))
    }

    async fn relay_chat(
        &self,
        ui: UiChannel,
        session: Arc<dyn AgentSession>,
        session_id: String,
        identity: AgentIdentity,
        generation: u64,
        text: String,
    ) {
        let user_message = ConversationMessage::new(MessageRole::User, text.as_str());
        if let Err(e) = self.history.append_message(&identity, &session_id, &user_message).await {
            tracing::warn!("Failed to record user message: {}", e);
        }

        let response = match session.send(&session_id, &text).await {
            Ok(r) => r,
            Err(e) => {
                if !self.is_current(generation).await {
                    tracing::debug!("Dropping send failure from ended session: {}", e);
                    return;
                }
                let error = PreviewError::RuntimeSendFailed(e);
                tracing::warn!("Send failed: {}", error);
                ui.post(OutboundMessage::error(classifier::classify(&error.to_string())));
                return;
            }
        };

        {
            let mut st = self.state.lock().await;
            if !st.is_current(generation) {
                tracing::debug!("Dropping reply from ended session {}", session_id);
                return;
            }
            if response.plan_id.is_some() {
                st.plan_id = response.plan_id.clone();
            }
        }

        let content = response.primary_content();
        ui.post(OutboundMessage::MessageSent {
            content: content.clone(),
        });

        if let Some(reply) = content {
            let message = ConversationMessage::new(MessageRole::Agent, reply);
            if let Err(e) = self.history.append_message(&identity, &session_id, &message).await {
                tracing::warn!("Failed to record agent reply: {}", e);
            }
        }

        if self.preferences.is_debug_mode() {
            if let Some(artifact) = response.debug_artifact {
                let dir = self.debug_log_dir(&identity);
                tokio::spawn(async move {
                    if let Err(e) = persist_debug_artifact(dir, artifact).await {
                        tracing::warn!("{}", e);
                        ui.post(OutboundMessage::DebugLogError {
                            message: e.to_string(),
                        });
                    }
                });
            }
        }
    }

    fn debug_log_dir(&self, identity: &AgentIdentity) -> PathBuf {
        match &self.config.preview.debug_log_dir {
            Some(dir) => dir.join(identity.storage_key()),
            None => self.history.agent_dir(identity).join("debug-logs"),
        }
    }

    // ============================================================================
    // 结束
    // ============================================================================

    /// 结束会话：启动中的会话由其启动任务收尾；偏好不受影响
    pub(crate) async fn end_session(&self, ui: &UiChannel) {
        let handle = {
            let mut st = self.state.lock().await;
            st.next_generation();
            st.pending = None;
            st.plan_id = None;
            st.ending = true;
            st.handle.take()
        };

        if let Some(handle) = &handle {
            if handle.starting {
                tracing::info!("endSession while starting; pending start will be torn down");
            } else {
                end_quietly(handle, EndReason::UserRequest).await;
            }
        }

        self.state.lock().await.ending = false;
        self.context.set_context(keys::SESSION_STARTING, false);
        self.context.set_context(keys::SESSION_ACTIVE, false);
        ui.post(OutboundMessage::SessionEnded);
    }

    // ============================================================================
    // Agent 发现与客户端应用
    // ============================================================================

    pub(crate) async fn discover_agents(&self, ui: &UiChannel) {
        let connection = match self.client_apps.resolve(ui).await {
            ClientAppResolution::Ready(conn) => Some(conn),
            ClientAppResolution::Unavailable => None,
            ClientAppResolution::AwaitingSelection => {
                tracing::info!("Agent discovery suspended until a client app is selected");
                return;
            }
        };
        self.publish_agents(ui, connection.as_ref()).await;
    }

    async fn client_app_selected(&self, ui: &UiChannel, name: &str) {
        match self.client_apps.select(name, ui).await {
            Ok(conn) => self.publish_agents(ui, Some(&conn)).await,
            Err(e) => {
                tracing::warn!("{}", e);
                ui.post(OutboundMessage::error(e.to_string()));
            }
        }
    }

    async fn publish_agents(&self, ui: &UiChannel, connection: Option<&Connection>) {
        let agents = self.collect_agents(connection, Some(ui)).await;
        let selected_agent_id = {
            let st = self.state.lock().await;
            st.target_agent_id()
        };
        let selected_agent_id = match selected_agent_id {
            Some(id) => Some(id),
            None => self.preferences.last_selected_agent().await,
        };
        ui.post(OutboundMessage::AvailableAgents {
            agents,
            selected_agent_id,
        });
    }

    /// 本地脚本 Agent + （有连接时）已发布 Agent；远端失败时经 UI 报告（若提供）
    pub(crate) async fn collect_agents(
        &self,
        connection: Option<&Connection>,
        ui: Option<&UiChannel>,
    ) -> Vec<AgentSummary> {
        let mut agents = Vec::new();
        let project_root = self.config.app.project_root();
        match self
            .runtime
            .list_previewable_agents(connection, &project_root)
            .await
        {
            Ok(files) => agents.extend(files.into_iter().map(|f| AgentSummary {
                id: agent::encode_local(&f.path),
                name: f.name,
                source: AgentSource::Script,
            })),
            Err(e) => tracing::warn!("Failed to list local agents: {}", e),
        }

        if let Some(conn) = connection {
            match self.runtime.list_remote_agents(conn).await {
                Ok(bots) => {
                    for bot in bots.into_iter().filter(|b| b.active) {
                        if agent::validate_published(&bot.id).is_err() {
                            tracing::warn!("Skipping bot with malformed id {}", bot.id);
                            continue;
                        }
                        agents.push(AgentSummary {
                            name: bot.label().to_string(),
                            id: bot.id,
                            source: AgentSource::Published,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to list published agents: {}", e);
                    if let Some(ui) = ui {
                        ui.post(OutboundMessage::error(classifier::classify(&e)));
                    }
                }
            }
        }
        agents
    }

    // ============================================================================
    // 历史、追踪、偏好
    // ============================================================================

    pub(crate) async fn load_agent_history(&self, ui: &UiChannel, agent_id: &str) {
        let agent_id = if agent_id.is_empty() {
            match self.state.lock().await.target_agent_id() {
                Some(id) => id,
                None => {
                    ui.post(OutboundMessage::NoHistoryFound {
                        agent_id: String::new(),
                    });
                    return;
                }
            }
        } else {
            agent_id.to_string()
        };
        let identity = agent::classify(&agent_id);

        match self.history.load_conversation(&identity).await {
            Ok(HistoryLookup::Found(messages)) => ui.post(OutboundMessage::ConversationHistory {
                agent_id: agent_id.clone(),
                messages,
            }),
            Ok(HistoryLookup::NotFound) => ui.post(OutboundMessage::NoHistoryFound {
                agent_id: agent_id.clone(),
            }),
            Err(e) => {
                tracing::warn!("Failed to load history for {}: {}", agent_id, e);
                self.context.set_context(keys::HAS_CONVERSATION_DATA, false);
                ui.post(OutboundMessage::NoHistoryFound {
                    agent_id: agent_id.clone(),
                });
            }
        }

        let entries = self.history.load_trace(&identity).await.unwrap_or_else(|e| {
            tracing::warn!("Failed to load traces for {}: {}", agent_id, e);
            Vec::new()
        });
        ui.post(OutboundMessage::TraceHistory { agent_id, entries });
    }

    /// 有活动会话且已有 plan 时向运行时取追踪并存档；否则回放最近一条已存追踪
    pub(crate) async fn trace_data(&self, ui: &UiChannel) {
        let (live, fallback) = {
            let st = self.state.lock().await;
            let live = st.active_handle().and_then(|h| {
                Some((
                    Arc::clone(&h.session),
                    h.session_id.clone()?,
                    st.plan_id.clone()?,
                    h.identity.clone(),
                    st.generation,
                ))
            });
            (live, st.target_agent_id())
        };

        if let Some((session, session_id, plan_id, identity, generation)) = live {
            match session.trace(&session_id, &plan_id).await {
                Ok(trace) => {
                    if !self.is_current(generation).await {
                        tracing::debug!("Dropping trace from ended session {}", session_id);
                        return;
                    }
                    let entry = TraceEntry {
                        storage_key: identity.storage_key(),
                        agent_id: identity.encoded(),
                        session_id,
                        plan_id,
                        timestamp: chrono::Utc::now().timestamp_millis(),
                        trace,
                    };
                    if let Err(e) = self.history.append_trace(&identity, &entry).await {
                        tracing::warn!("Failed to store trace: {}", e);
                    }
                    ui.post(OutboundMessage::TraceData { entry: Some(entry) });
                }
                Err(e) => {
                    tracing::warn!("Trace request failed: {}", e);
                    ui.post(OutboundMessage::error(classifier::classify(&e)));
                }
            }
            return;
        }

        let entry = match fallback {
            Some(id) => self
                .history
                .latest_trace(&agent::classify(&id))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to read stored trace: {}", e);
                    None
                }),
            None => None,
        };
        ui.post(OutboundMessage::TraceData { entry });
    }

    /// 更新调试模式并传播到活动会话；非布尔负载静默忽略
    pub(crate) async fn apply_debug_mode(&self, value: &Value) -> Option<bool> {
        let enabled = self.preferences.set_debug_mode(value).await?;
        {
            let st = self.state.lock().await;
            if let Some(handle) = st.handle.as_ref() {
                handle.session.set_debug_mode(enabled);
            }
        }
        if let Some(ui) = self.view().await {
            ui.post(OutboundMessage::DebugModeChanged { enabled });
        }
        Some(enabled)
    }

    pub(crate) async fn preselect(&self, agent_id: Option<String>) {
        self.state.lock().await.preselected_agent_id = agent_id.clone();
        self.context.set_context(keys::AGENT_SELECTED, agent_id.is_some());
        self.preferences
            .set_last_selected_agent(agent_id.as_deref())
            .await;
    }
}

/// 结束已活动的会话；失败只记日志
pub(super) async fn end_quietly(handle: &SessionHandle, reason: EndReason) {
    if handle.starting {
        return;
    }
    let Some(session_id) = handle.session_id.as_deref() else {
        return;
    };
    tracing::info!("Ending session {} ({})", session_id, reason.as_str());
    if let Err(e) = handle.session.end(session_id, reason).await {
        tracing::warn!("{}", PreviewError::RuntimeEndFailed(e));
    }
}

/// 停止事件转发并等待已到达的事件发完
async fn stop_relay(token: CancellationToken, relay: JoinHandle<()>) {
    token.cancel();
    if let Err(e) = relay.await {
        tracing::warn!("Lifecycle relay task failed: {}", e);
    }
}

async fn persist_debug_artifact(dir: PathBuf, artifact: DebugArtifact) -> Result<PathBuf, PreviewError> {
    let write = async {
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&artifact.name);
        tokio::fs::write(&path, artifact.content.as_bytes()).await?;
        Ok::<_, std::io::Error>(path)
    };
    write
        .await
        .map_err(|e| PreviewError::DebugArtifactPersistFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OrchestratorBuilder;
    use crate::host::MemoryStore;
    use crate::runtime::MockRuntime;
    use serde_json::json;
    use tempfile::TempDir;

    async fn orchestrator(dir: &TempDir) -> Arc<Orchestrator> {
        let mut config = AppConfig::default();
        config.app.project_root = Some(dir.path().to_path_buf());
        config.app.storage_root = Some(dir.path().join("store"));
        OrchestratorBuilder::new(config, Arc::new(MockRuntime::default()))
            .with_storage(Arc::new(MemoryStore::default()))
            .build()
            .await
    }

    #[tokio::test]
    async fn test_messages_before_view_are_dropped() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        assert!(orch
            .clone()
            .dispatch(InboundMessage::GetInitialLiveMode)
            .await
            .is_none());
        assert!(matches!(
            orch.require_view().await,
            Err(PreviewError::ViewNotReady)
        ));
    }

    #[tokio::test]
    async fn test_begin_start_requires_target() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        let (ui, mut rx) = UiChannel::new();

        let err = orch.begin_start(&ui, None).await.err().unwrap();
        assert!(matches!(err, PreviewError::NoAgentSelected));
        let err = orch
            .begin_start(&ui, Some("0Xtooshort".to_string()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PreviewError::InvalidAgentId(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(orch.phase().await, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_begin_start_uses_preselection() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        let (ui, mut rx) = UiChannel::new();
        orch.preselect(Some("0Xx000000000001".to_string())).await;

        let attempt = orch.begin_start(&ui, None).await.unwrap();
        assert_eq!(attempt.agent_id, "0Xx000000000001");
        assert_eq!(orch.phase().await, SessionPhase::Starting);
        assert!(matches!(rx.try_recv().unwrap(), OutboundMessage::ClearMessages));
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutboundMessage::SessionStarting { .. }
        ));
    }

    #[tokio::test]
    async fn test_configuration_and_flag_payloads() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        let (ui, mut rx) = UiChannel::new();
        orch.attach_view(ui).await;

        orch.clone()
            .dispatch(InboundMessage::GetConfiguration {
                section: "showAgentTracer".to_string(),
            })
            .await;
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundMessage::Configuration {
                section: "showAgentTracer".to_string(),
                value: json!(true),
            }
        );

        assert_eq!(orch.apply_debug_mode(&json!("yes")).await, None);
        assert!(rx.try_recv().is_err());
        assert_eq!(orch.apply_debug_mode(&json!(true)).await, Some(true));
        assert!(orch.preferences().is_debug_mode());
    }

    #[tokio::test]
    async fn test_trace_without_session_replays_stored_entry() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        let (ui, mut rx) = UiChannel::new();

        orch.trace_data(&ui).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundMessage::TraceData { entry: None }
        );

        let identity = agent::classify("0Xx000000000001");
        let entry = TraceEntry {
            storage_key: identity.storage_key(),
            agent_id: identity.encoded(),
            session_id: "s1".to_string(),
            plan_id: "p1".to_string(),
            timestamp: 1,
            trace: json!({ "steps": [] }),
        };
        orch.history.append_trace(&identity, &entry).await.unwrap();
        orch.preselect(Some(identity.encoded())).await;

        orch.trace_data(&ui).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundMessage::TraceData { entry: Some(entry) }
        );
    }
}
