//! 宿主环境接口
//!
//! 编排器从宿主获取：连接/凭据解析、持久化键值存储、上下文标志、命令调用。
//! 这里定义 trait 及默认实现（基于配置的连接、JSON 文件存储、内存标志、日志命令执行器）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// UI 可见的上下文标志名
pub mod keys {
    pub const SESSION_ACTIVE: &str = "agentview.sessionActive";
    pub const SESSION_STARTING: &str = "agentview.sessionStarting";
    pub const AGENT_SELECTED: &str = "agentview.agentSelected";
    pub const HAS_CONVERSATION_DATA: &str = "agentview.hasConversationData";
    pub const HAS_TRACE_DATA: &str = "agentview.hasTraceData";
    pub const DEBUG_MODE: &str = "agentview.debugMode";
    pub const LIVE_MODE: &str = "agentview.liveMode";
}

/// 已解析的后端连接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub username: String,
    pub client_app: Option<String>,
    pub instance_url: Option<String>,
}

/// 连接/凭据解析
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// 已注册的客户端应用名
    async fn client_apps(&self) -> Result<Vec<String>, String>;

    /// 当前默认用户名（诊断信息用）
    async fn username(&self) -> Option<String>;

    /// 使用指定客户端应用建立连接；None 表示使用默认凭据
    async fn connect(&self, client_app: Option<&str>) -> Result<Connection, String>;
}

/// 持久化键值存储（带默认值的 get / set）
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: Value) -> std::io::Result<()>;

    async fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).await.and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// 向宿主推送布尔上下文标志
pub trait ContextSink: Send + Sync {
    fn set_context(&self, key: &str, value: bool);
}

/// 宿主命令调用
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, args: Vec<Value>) -> Result<(), String>;
}

// ============================================================================
// 默认实现
// ============================================================================

/// 基于配置的连接提供者：客户端应用列表来自配置文件
#[derive(Debug, Clone, Default)]
pub struct ConfiguredConnections {
    username: Option<String>,
    instance_url: Option<String>,
    client_apps: Vec<String>,
}

impl ConfiguredConnections {
    pub fn new(username: Option<String>, instance_url: Option<String>, client_apps: Vec<String>) -> Self {
        Self {
            username,
            instance_url,
            client_apps,
        }
    }
}

#[async_trait]
impl ConnectionProvider for ConfiguredConnections {
    async fn client_apps(&self) -> Result<Vec<String>, String> {
        Ok(self.client_apps.clone())
    }

    async fn username(&self) -> Option<String> {
        self.username.clone()
    }

    async fn connect(&self, client_app: Option<&str>) -> Result<Connection, String> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| "No default username configured".to_string())?;
        if let Some(app) = client_app {
            if !self.client_apps.iter().any(|a| a == app) {
                return Err(format!("Client app '{}' is not registered for {}", app, username));
            }
        }
        Ok(Connection {
            username,
            client_app: client_app.map(str::to_string),
            instance_url: self.instance_url.clone(),
        })
    }
}

/// 内存键值存储（测试 / 无持久化场景）
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) -> std::io::Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// 单文件 JSON 键值存储：打开时整体读入，每次 set 整体写回
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// 文件不存在或内容损坏时从空表开始
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Preference file {:?} is corrupt ({}), starting empty", path, e);
                Map::new()
            }),
            Err(_) => Map::new(),
        };
        Self {
            path,
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) -> std::io::Result<()> {
        let snapshot = {
            let mut values = self.values.write().await;
            values.insert(key.to_string(), value);
            serde_json::to_string_pretty(&*values)?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, snapshot).await
    }
}

/// 记录上下文标志的内存实现，同时输出 debug 日志
#[derive(Debug, Default)]
pub struct ContextFlags {
    flags: Mutex<HashMap<String, bool>>,
}

impl ContextFlags {
    pub fn get(&self, key: &str) -> Option<bool> {
        self.flags.lock().ok().and_then(|f| f.get(key).copied())
    }
}

impl ContextSink for ContextFlags {
    fn set_context(&self, key: &str, value: bool) {
        tracing::debug!("context {} = {}", key, value);
        if let Ok(mut flags) = self.flags.lock() {
            flags.insert(key.to_string(), value);
        }
    }
}

/// 仅记录日志的命令执行器（宿主未接入命令系统时使用）
#[derive(Debug, Default)]
pub struct LoggingCommandExecutor;

#[async_trait]
impl CommandExecutor for LoggingCommandExecutor {
    async fn execute(&self, command: &str, args: Vec<Value>) -> Result<(), String> {
        tracing::info!("executeCommand {} ({} args)", command, args.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_file_store_roundtrip_across_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("prefs.json");

        let store = JsonFileStore::open(&path).await;
        assert!(!store.get_bool("isLiveMode", false).await);
        store.set("isLiveMode", json!(true)).await.unwrap();

        let reopened = JsonFileStore::open(&path).await;
        assert!(reopened.get_bool("isLiveMode", false).await);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = JsonFileStore::open(&path).await;
        assert!(store.get("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_configured_connections_rejects_unknown_app() {
        let provider = ConfiguredConnections::new(
            Some("dev@example.com".into()),
            None,
            vec!["preview-app".into()],
        );
        assert!(provider.connect(Some("other")).await.is_err());
        let conn = provider.connect(Some("preview-app")).await.unwrap();
        assert_eq!(conn.client_app.as_deref(), Some("preview-app"));
    }
}
