//! Mock 运行时（无需真实 SDK）
//!
//! 回显用户输入，按配置延迟；可注入启动/发送失败、用信号量卡住 start，
//! 并记录 end 调用，便于本地跑通与测试会话编排。

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};
use walkdir::WalkDir;

use super::traits::{
    AgentRuntime, AgentSession, BotRecord, DebugArtifact, EndReason, EventStream, LifecycleEvent,
    LocalAgentFile, RuntimeMessage, SendResponse, SessionKind, SessionTarget, StartResponse,
};
use crate::host::Connection;

/// 本地脚本 Agent 文件扩展名
pub const AGENT_FILE_EXTENSION: &str = "agent";

#[derive(Default)]
struct MockShared {
    start_error: Mutex<Option<String>>,
    send_error: Mutex<Option<String>>,
    ended: Mutex<Vec<(String, EndReason)>>,
    started: AtomicUsize,
    opened: AtomicUsize,
    debug_calls: Mutex<Vec<bool>>,
}

/// Mock 运行时
pub struct MockRuntime {
    latency: Duration,
    bots: Vec<BotRecord>,
    start_gate: Option<Arc<Semaphore>>,
    events: broadcast::Sender<LifecycleEvent>,
    shared: Arc<MockShared>,
}

impl MockRuntime {
    pub fn new(latency: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            latency,
            bots: Vec::new(),
            start_gate: None,
            events,
            shared: Arc::new(MockShared::default()),
        }
    }

    pub fn with_bots(mut self, bots: Vec<BotRecord>) -> Self {
        self.bots = bots;
        self
    }

    /// start 在编译事件之后等待一个许可；返回信号量供调用方放行
    pub fn with_start_gate(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.start_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn fail_next_start(&self, error: impl Into<String>) {
        if let Ok(mut e) = self.shared.start_error.lock() {
            *e = Some(error.into());
        }
    }

    pub fn fail_sends(&self, error: Option<String>) {
        if let Ok(mut e) = self.shared.send_error.lock() {
            *e = error;
        }
    }

    /// 已结束的会话（session_id, 原因）
    pub fn ended(&self) -> Vec<(String, EndReason)> {
        self.shared.ended.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn started_count(&self) -> usize {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn opened_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn debug_calls(&self) -> Vec<bool> {
        self.shared.debug_calls.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// 手动发出生命周期事件
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new(Duration::from_millis(0))
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    async fn open_session(&self, target: &SessionTarget) -> Result<Arc<dyn AgentSession>, String> {
        if target.kind == SessionKind::Preview && target.connection.is_none() {
            return Err("A connection is required to preview a published agent".to_string());
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            name: target.identity.display_name(),
            kind: target.kind,
            latency: self.latency,
            start_gate: self.start_gate.clone(),
            events: self.events.clone(),
            debug: AtomicBool::new(target.debug_mode),
            plans: Mutex::new(HashMap::new()),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn list_remote_agents(&self, _connection: &Connection) -> Result<Vec<BotRecord>, String> {
        Ok(self.bots.clone())
    }

    async fn list_previewable_agents(
        &self,
        _connection: Option<&Connection>,
        project_root: &Path,
    ) -> Result<Vec<LocalAgentFile>, String> {
        let mut found: Vec<LocalAgentFile> = WalkDir::new(project_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.depth() > 0 && (name.starts_with('.') || name == "node_modules"))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == AGENT_FILE_EXTENSION)
                    .unwrap_or(false)
            })
            .map(|e| LocalAgentFile {
                name: e
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: e.path().to_path_buf(),
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    fn events(&self) -> EventStream {
        let rx = self.events.subscribe();
        Box::pin(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => return Some((ev, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Lifecycle subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}

struct MockSession {
    name: String,
    kind: SessionKind,
    latency: Duration,
    start_gate: Option<Arc<Semaphore>>,
    events: broadcast::Sender<LifecycleEvent>,
    debug: AtomicBool,
    /// plan_id -> 该轮用户输入
    plans: Mutex<HashMap<String, String>>,
    shared: Arc<MockShared>,
}

#[async_trait]
impl AgentSession for MockSession {
    async fn start(&self) -> Result<StartResponse, String> {
        if self.kind == SessionKind::Simulate {
            let _ = self.events.send(LifecycleEvent::Compiling {
                message: Some(format!("Compiling {}...", self.name)),
                error: None,
            });
        }
        if let Some(gate) = &self.start_gate {
            let permit = gate.acquire().await.map_err(|e| e.to_string())?;
            permit.forget();
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let injected = self.shared.start_error.lock().ok().and_then(|mut e| e.take());
        if let Some(error) = injected {
            if self.kind == SessionKind::Simulate {
                let _ = self.events.send(LifecycleEvent::Compiling {
                    message: None,
                    error: Some(error.clone()),
                });
            }
            return Err(error);
        }

        if self.kind == SessionKind::Simulate {
            let _ = self.events.send(LifecycleEvent::SimulationStarting {
                message: Some("Starting simulation...".to_string()),
            });
        }
        self.shared.started.fetch_add(1, Ordering::SeqCst);
        Ok(StartResponse {
            session_id: uuid::Uuid::new_v4().to_string(),
            messages: vec![RuntimeMessage {
                kind: "Inform".to_string(),
                message: Some(format!("Hi, I'm {}. How can I help?", self.name)),
            }],
        })
    }

    async fn send(&self, _session_id: &str, text: &str) -> Result<SendResponse, String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let injected = self.shared.send_error.lock().ok().and_then(|e| e.clone());
        if let Some(error) = injected {
            return Err(error);
        }

        let plan_id = uuid::Uuid::new_v4().to_string();
        if let Ok(mut plans) = self.plans.lock() {
            plans.insert(plan_id.clone(), text.to_string());
        }
        let debug_artifact = self.debug.load(Ordering::SeqCst).then(|| DebugArtifact {
            name: format!("{}-{}.log", self.name, &plan_id[..8]),
            content: format!("DEBUG|mock action log for input: {}\n", text),
        });
        Ok(SendResponse {
            messages: vec![RuntimeMessage {
                kind: "Inform".to_string(),
                message: Some(format!("Echo: {}", text)),
            }],
            plan_id: Some(plan_id),
            debug_artifact,
        })
    }

    async fn end(&self, session_id: &str, reason: EndReason) -> Result<(), String> {
        if let Ok(mut ended) = self.shared.ended.lock() {
            ended.push((session_id.to_string(), reason));
        }
        Ok(())
    }

    async fn trace(&self, _session_id: &str, plan_id: &str) -> Result<Value, String> {
        let input = self
            .plans
            .lock()
            .ok()
            .and_then(|p| p.get(plan_id).cloned())
            .ok_or_else(|| format!("404 plan {} not found", plan_id))?;
        Ok(json!({
            "planId": plan_id,
            "steps": [
                { "type": "UserInputStep", "message": input },
                { "type": "PlannerResponseStep", "message": format!("Echo: {}", input) }
            ]
        }))
    }

    fn set_debug_mode(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::SeqCst);
        if let Ok(mut calls) = self.shared.debug_calls.lock() {
            calls.push(enabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentIdentity;
    use futures_util::StreamExt;
    use tempfile::TempDir;

    fn local_target() -> SessionTarget {
        SessionTarget {
            identity: AgentIdentity::Local {
                file_path: "/ws/Helper.agent".into(),
            },
            kind: SessionKind::Simulate,
            connection: None,
            live_mode: false,
            debug_mode: true,
        }
    }

    #[tokio::test]
    async fn test_mock_session_flow() {
        let runtime = MockRuntime::default();
        let mut events = runtime.events();
        let session = runtime.open_session(&local_target()).await.unwrap();

        let started = session.start().await.unwrap();
        assert_eq!(started.initial_content().as_deref(), Some("Hi, I'm Helper. How can I help?"));
        assert!(matches!(events.next().await, Some(LifecycleEvent::Compiling { .. })));
        assert!(matches!(events.next().await, Some(LifecycleEvent::SimulationStarting { .. })));

        let reply = session.send(&started.session_id, "hello").await.unwrap();
        assert_eq!(reply.primary_content().as_deref(), Some("Echo: hello"));
        assert!(reply.debug_artifact.is_some());

        let trace = session
            .trace(&started.session_id, reply.plan_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(trace["steps"][0]["message"], "hello");

        session.end(&started.session_id, EndReason::UserRequest).await.unwrap();
        assert_eq!(runtime.ended().len(), 1);
    }

    #[tokio::test]
    async fn test_preview_requires_connection() {
        let runtime = MockRuntime::default();
        let mut target = local_target();
        target.kind = SessionKind::Preview;
        assert!(runtime.open_session(&target).await.is_err());
    }

    #[tokio::test]
    async fn test_discovers_agent_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join("agents/Beta.agent"), "").unwrap();
        std::fs::write(dir.path().join("agents/Alpha.agent"), "").unwrap();
        std::fs::write(dir.path().join(".hidden/Gamma.agent"), "").unwrap();
        std::fs::write(dir.path().join("agents/readme.md"), "").unwrap();

        let runtime = MockRuntime::default();
        let found = runtime.list_previewable_agents(None, dir.path()).await.unwrap();
        let names: Vec<_> = found.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }
}
