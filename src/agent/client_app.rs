//! 客户端应用（连接上下文）解析
//!
//! - 0 个：发送 clientAppRequired（附诊断原因与用户名），只展示本地 Agent
//! - 1 个：静默建立连接
//! - 多个：发送 selectClientApp，暂停 Agent 发现，直到 UI 回传 clientAppSelected
//!
//! 选定的连接在进程生命周期内缓存，直到显式 refresh。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::core::PreviewError;
use crate::gateway::{OutboundMessage, UiChannel};
use crate::host::{Connection, ConnectionProvider};

/// 一次解析的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAppResolution {
    Ready(Connection),
    /// 没有可用的客户端应用，仅本地 Agent 可用
    Unavailable,
    /// 已请求 UI 选择，等待 clientAppSelected
    AwaitingSelection,
}

pub struct ClientAppResolver {
    provider: Arc<dyn ConnectionProvider>,
    cached: RwLock<Option<Connection>>,
    awaiting_selection: AtomicBool,
}

impl ClientAppResolver {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            cached: RwLock::new(None),
            awaiting_selection: AtomicBool::new(false),
        }
    }

    pub async fn current(&self) -> Option<Connection> {
        self.cached.read().await.clone()
    }

    pub fn is_awaiting_selection(&self) -> bool {
        self.awaiting_selection.load(Ordering::SeqCst)
    }

    /// 丢弃缓存的选择，下次解析重新询问
    pub async fn refresh(&self) {
        *self.cached.write().await = None;
        self.awaiting_selection.store(false, Ordering::SeqCst);
    }

    /// Agent 发现前调用：按客户端应用数量决定连接或与 UI 交互
    pub async fn resolve(&self, ui: &UiChannel) -> ClientAppResolution {
        if let Some(conn) = self.current().await {
            return ClientAppResolution::Ready(conn);
        }

        let username = self.provider.username().await;
        let apps = match self.provider.client_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                tracing::warn!("Failed to list client apps: {}", e);
                ui.post(OutboundMessage::ClientAppRequired {
                    message: format!("Unable to read client apps: {}", e),
                    username,
                });
                return ClientAppResolution::Unavailable;
            }
        };

        match apps.as_slice() {
            [] => {
                let who = username.clone().unwrap_or_else(|| "the default user".to_string());
                ui.post(OutboundMessage::ClientAppRequired {
                    message: format!(
                        "No client app is registered for {}. Published agents need a client app; only local agents are listed.",
                        who
                    ),
                    username,
                });
                ClientAppResolution::Unavailable
            }
            [only] => match self.provider.connect(Some(only)).await {
                Ok(conn) => {
                    tracing::info!("Using client app '{}'", only);
                    *self.cached.write().await = Some(conn.clone());
                    ClientAppResolution::Ready(conn)
                }
                Err(e) => {
                    tracing::warn!("Client app '{}' connection failed: {}", only, e);
                    ui.post(OutboundMessage::ClientAppRequired {
                        message: format!("Could not connect with client app '{}': {}", only, e),
                        username,
                    });
                    ClientAppResolution::Unavailable
                }
            },
            many => {
                self.awaiting_selection.store(true, Ordering::SeqCst);
                ui.post(OutboundMessage::SelectClientApp {
                    client_apps: many.to_vec(),
                });
                ClientAppResolution::AwaitingSelection
            }
        }
    }

    /// UI 回传选择后建立连接并缓存
    pub async fn select(&self, name: &str, ui: &UiChannel) -> Result<Connection, PreviewError> {
        let conn = self
            .provider
            .connect(Some(name))
            .await
            .map_err(PreviewError::ClientAppSelectionFailed)?;
        *self.cached.write().await = Some(conn.clone());
        self.awaiting_selection.store(false, Ordering::SeqCst);
        tracing::info!("Client app '{}' selected", name);
        ui.post(OutboundMessage::ClientAppReady {
            client_app_name: name.to_string(),
        });
        Ok(conn)
    }

    /// 启动已发布 Agent 会话时需要一个确定的连接；不与 UI 交互
    pub async fn require_connection(&self) -> Result<Connection, PreviewError> {
        if let Some(conn) = self.current().await {
            return Ok(conn);
        }
        let apps = self
            .provider
            .client_apps()
            .await
            .map_err(PreviewError::ConnectionResolutionFailed)?;
        match apps.as_slice() {
            [] => Err(PreviewError::ConnectionResolutionFailed(
                "no client app is registered".to_string(),
            )),
            [only] => {
                let conn = self
                    .provider
                    .connect(Some(only))
                    .await
                    .map_err(PreviewError::ConnectionResolutionFailed)?;
                *self.cached.write().await = Some(conn.clone());
                Ok(conn)
            }
            _ => Err(PreviewError::ConnectionResolutionFailed(
                "select a client app first".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ConfiguredConnections;

    fn resolver(apps: &[&str]) -> ClientAppResolver {
        ClientAppResolver::new(Arc::new(ConfiguredConnections::new(
            Some("dev@example.com".to_string()),
            None,
            apps.iter().map(|s| s.to_string()).collect(),
        )))
    }

    #[tokio::test]
    async fn test_zero_apps_requires_client_app() {
        let (ui, mut rx) = UiChannel::new();
        let r = resolver(&[]);
        assert_eq!(r.resolve(&ui).await, ClientAppResolution::Unavailable);
        match rx.try_recv().unwrap() {
            OutboundMessage::ClientAppRequired { username, .. } => {
                assert_eq!(username.as_deref(), Some("dev@example.com"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(r.require_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_single_app_is_silent() {
        let (ui, mut rx) = UiChannel::new();
        let r = resolver(&["only"]);
        assert!(matches!(r.resolve(&ui).await, ClientAppResolution::Ready(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(r.current().await.unwrap().client_app.as_deref(), Some("only"));
    }

    #[tokio::test]
    async fn test_many_apps_waits_for_selection_then_caches() {
        let (ui, mut rx) = UiChannel::new();
        let r = resolver(&["a", "b"]);
        assert_eq!(r.resolve(&ui).await, ClientAppResolution::AwaitingSelection);
        assert!(r.is_awaiting_selection());
        assert!(matches!(
            rx.try_recv().unwrap(),
            OutboundMessage::SelectClientApp { ref client_apps } if client_apps.len() == 2
        ));

        let err = r.select("nope", &ui).await.unwrap_err();
        assert!(err.to_string().starts_with("Error selecting client app: "));

        r.select("b", &ui).await.unwrap();
        assert!(matches!(rx.try_recv().unwrap(), OutboundMessage::ClientAppReady { .. }));
        assert!(matches!(r.resolve(&ui).await, ClientAppResolution::Ready(_)));
        assert!(rx.try_recv().is_err());

        r.refresh().await;
        assert_eq!(r.resolve(&ui).await, ClientAppResolution::AwaitingSelection);
    }
}
