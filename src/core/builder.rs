//! 编排器构建器：统一的初始化逻辑
//!
//! stdio 宿主与测试共用同一条装配路径，未显式注入的协作者按配置取默认实现。

use std::sync::Arc;

use super::orchestrator::Orchestrator;
use crate::agent::ClientAppResolver;
use crate::config::AppConfig;
use crate::host::{
    CommandExecutor, ConfiguredConnections, ConnectionProvider, ContextFlags, ContextSink,
    JsonFileStore, KeyValueStore, LoggingCommandExecutor,
};
use crate::memory::{HistoryStore, PreferenceStore};
use crate::runtime::AgentRuntime;

pub struct OrchestratorBuilder {
    config: AppConfig,
    runtime: Arc<dyn AgentRuntime>,
    connections: Option<Arc<dyn ConnectionProvider>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    context: Option<Arc<dyn ContextSink>>,
    commands: Option<Arc<dyn CommandExecutor>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            config,
            runtime,
            connections: None,
            storage: None,
            context: None,
            commands: None,
        }
    }

    /// 注入连接提供者（默认读 [connections] 配置）
    pub fn with_connections(mut self, connections: Arc<dyn ConnectionProvider>) -> Self {
        self.connections = Some(connections);
        self
    }

    /// 注入偏好存储（默认 <storage_root>/preferences.json）
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextSink>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_commands(mut self, commands: Arc<dyn CommandExecutor>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// 构建编排器；偏好在此加载并把初始上下文标志推给宿主
    pub async fn build(self) -> Arc<Orchestrator> {
        let storage_root = self.config.app.storage_root();

        let connections = self.connections.unwrap_or_else(|| {
            let c = &self.config.connections;
            Arc::new(ConfiguredConnections::new(
                c.username.clone(),
                c.instance_url.clone(),
                c.client_apps.clone(),
            ))
        });
        let storage: Arc<dyn KeyValueStore> = match self.storage {
            Some(s) => s,
            None => Arc::new(JsonFileStore::open(storage_root.join("preferences.json")).await),
        };
        let context = self
            .context
            .unwrap_or_else(|| Arc::new(ContextFlags::default()));
        let commands = self
            .commands
            .unwrap_or_else(|| Arc::new(LoggingCommandExecutor));

        let preferences = PreferenceStore::load(storage, Arc::clone(&context)).await;
        let history = HistoryStore::new(&storage_root, Arc::clone(&context));
        tracing::info!(
            "Orchestrator ready (storage: {}, live: {}, debug: {})",
            storage_root.display(),
            preferences.is_live_mode(),
            preferences.is_debug_mode()
        );

        Arc::new(Orchestrator::new(
            self.runtime,
            ClientAppResolver::new(connections),
            history,
            preferences,
            context,
            commands,
            self.config,
        ))
    }
}
