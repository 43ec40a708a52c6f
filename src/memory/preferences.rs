//! 进程级偏好：Live 模式、调试模式、上次选择的 Agent
//!
//! 构造时从持久化存储读取一次（默认均为 false），每次变更立即写回。
//! 会话的开始/结束从不重置这些值。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::host::{keys, ContextSink, KeyValueStore};

const LIVE_MODE_KEY: &str = "isLiveMode";
const DEBUG_MODE_KEY: &str = "isDebugMode";
const LAST_AGENT_KEY: &str = "lastSelectedAgentId";

/// 偏好快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Preferences {
    pub is_live_mode: bool,
    pub is_debug_mode: bool,
}

pub struct PreferenceStore {
    storage: Arc<dyn KeyValueStore>,
    context: Arc<dyn ContextSink>,
    live_mode: AtomicBool,
    debug_mode: AtomicBool,
}

impl PreferenceStore {
    /// 读取持久化值并立即推送调试模式标志
    pub async fn load(storage: Arc<dyn KeyValueStore>, context: Arc<dyn ContextSink>) -> Self {
        let live = storage.get_bool(LIVE_MODE_KEY, false).await;
        let debug_mode = storage.get_bool(DEBUG_MODE_KEY, false).await;
        context.set_context(keys::DEBUG_MODE, debug_mode);
        context.set_context(keys::LIVE_MODE, live);
        tracing::info!("Preferences loaded: live_mode={}, debug_mode={}", live, debug_mode);
        Self {
            storage,
            context,
            live_mode: AtomicBool::new(live),
            debug_mode: AtomicBool::new(debug_mode),
        }
    }

    pub fn snapshot(&self) -> Preferences {
        Preferences {
            is_live_mode: self.is_live_mode(),
            is_debug_mode: self.is_debug_mode(),
        }
    }

    pub fn is_live_mode(&self) -> bool {
        self.live_mode.load(Ordering::SeqCst)
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::SeqCst)
    }

    /// 非布尔负载被静默忽略，返回 None；否则返回新值
    pub async fn set_live_mode(&self, value: &Value) -> Option<bool> {
        let enabled = value.as_bool()?;
        self.live_mode.store(enabled, Ordering::SeqCst);
        self.persist(LIVE_MODE_KEY, enabled).await;
        self.context.set_context(keys::LIVE_MODE, enabled);
        Some(enabled)
    }

    /// 同 set_live_mode；向活动会话传播由调用方（编排器）负责
    pub async fn set_debug_mode(&self, value: &Value) -> Option<bool> {
        let enabled = value.as_bool()?;
        self.debug_mode.store(enabled, Ordering::SeqCst);
        self.persist(DEBUG_MODE_KEY, enabled).await;
        self.context.set_context(keys::DEBUG_MODE, enabled);
        Some(enabled)
    }

    pub async fn last_selected_agent(&self) -> Option<String> {
        self.storage
            .get(LAST_AGENT_KEY)
            .await
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    pub async fn set_last_selected_agent(&self, agent_id: Option<&str>) {
        let value = agent_id.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null);
        if let Err(e) = self.storage.set(LAST_AGENT_KEY, value).await {
            tracing::warn!("Failed to persist last selected agent: {}", e);
        }
    }

    async fn persist(&self, key: &str, value: bool) {
        if let Err(e) = self.storage.set(key, Value::Bool(value)).await {
            tracing::warn!("Failed to persist preference {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ContextFlags, MemoryStore};
    use serde_json::json;

    async fn fresh() -> (PreferenceStore, Arc<MemoryStore>, Arc<ContextFlags>) {
        let storage = Arc::new(MemoryStore::default());
        let flags = Arc::new(ContextFlags::default());
        let prefs = PreferenceStore::load(storage.clone(), flags.clone()).await;
        (prefs, storage, flags)
    }

    #[tokio::test]
    async fn test_defaults_and_initial_flag() {
        let (prefs, _, flags) = fresh().await;
        assert_eq!(prefs.snapshot(), Preferences::default());
        assert_eq!(flags.get(keys::DEBUG_MODE), Some(false));
    }

    #[tokio::test]
    async fn test_loads_persisted_values() {
        let storage = Arc::new(MemoryStore::default());
        storage.set(DEBUG_MODE_KEY, json!(true)).await.unwrap();
        let flags = Arc::new(ContextFlags::default());

        storage.set(LIVE_MODE_KEY, json!(true)).await.unwrap();

        let prefs = PreferenceStore::load(storage, flags.clone()).await;
        assert!(prefs.is_debug_mode());
        assert!(prefs.is_live_mode());
        assert_eq!(flags.get(keys::DEBUG_MODE), Some(true));
        assert_eq!(flags.get(keys::LIVE_MODE), Some(true));
    }

    #[tokio::test]
    async fn test_non_boolean_ignored() {
        let (prefs, storage, _) = fresh().await;
        assert_eq!(prefs.set_live_mode(&json!("true")).await, None);
        assert_eq!(prefs.set_debug_mode(&json!(1)).await, None);
        assert_eq!(prefs.set_debug_mode(&Value::Null).await, None);
        assert!(!prefs.is_live_mode());
        assert!(storage.get(LIVE_MODE_KEY).await.is_none());
    }

    #[tokio::test]
    async fn test_set_persists_and_flags() {
        let (prefs, storage, flags) = fresh().await;
        assert_eq!(prefs.set_live_mode(&json!(true)).await, Some(true));
        assert_eq!(storage.get(LIVE_MODE_KEY).await, Some(json!(true)));
        assert_eq!(flags.get(keys::LIVE_MODE), Some(true));
    }

    #[tokio::test]
    async fn test_last_selected_agent() {
        let (prefs, _, _) = fresh().await;
        assert_eq!(prefs.last_selected_agent().await, None);
        prefs.set_last_selected_agent(Some("0Xx000000000001")).await;
        assert_eq!(prefs.last_selected_agent().await.as_deref(), Some("0Xx000000000001"));
        prefs.set_last_selected_agent(None).await;
        assert_eq!(prefs.last_selected_agent().await, None);
    }
}
