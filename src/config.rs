//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENTVIEW__*` 覆盖（双下划线表示嵌套，如 `AGENTVIEW__PREVIEW__SHOW_AGENT_TRACER=false`）。
//! config 会把键名转成小写，所以文件里一律用 snake_case；发给 UI 时再转 camelCase。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::BotRecord;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub preview: PreviewSection,
    #[serde(default)]
    pub connections: ConnectionsSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

/// [app] 段：项目根目录、历史存储目录、导出目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 扫描本地 .agent 文件的项目根，未设置时用当前目录
    pub project_root: Option<PathBuf>,
    /// 对话/追踪/偏好存放目录，未设置时用 <project_root>/.agentview
    pub storage_root: Option<PathBuf>,
    /// exportConversation 的默认输出目录
    pub export_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn project_root(&self) -> PathBuf {
        self.project_root.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(|| self.project_root().join(".agentview"))
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(|| self.storage_root().join("exports"))
    }
}

/// [preview] 段：UI 通过 getConfiguration 读取的设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct PreviewSection {
    #[serde(default = "default_true")]
    pub show_agent_tracer: bool,
    #[serde(default)]
    pub show_session_id: bool,
    /// 调试日志目录，未设置时写到各 Agent 的历史目录下
    #[serde(default)]
    pub debug_log_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            show_agent_tracer: true,
            show_session_id: false,
            debug_log_dir: None,
        }
    }
}

impl PreviewSection {
    /// 按键名取设置值（getConfiguration），未知键返回 null
    pub fn setting(&self, key: &str) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.get(key).cloned())
            .unwrap_or(Value::Null)
    }
}

/// [connections] 段：默认用户与已注册的客户端应用
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectionsSection {
    pub username: Option<String>,
    pub instance_url: Option<String>,
    #[serde(default)]
    pub client_apps: Vec<String>,
}

/// [runtime] 段：Mock 运行时参数
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeSection {
    /// 每次 start/send 的模拟延迟（毫秒）
    #[serde(default)]
    pub latency_ms: u64,
    /// 模拟的已发布 Agent
    #[serde(default)]
    pub bots: Vec<BotRecord>,
}

/// 从 config 目录加载配置，环境变量 AGENTVIEW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENTVIEW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENTVIEW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.preview.show_agent_tracer);
        assert_eq!(cfg.app.storage_root(), PathBuf::from("./.agentview"));
        assert!(cfg.connections.client_apps.is_empty());
    }

    #[test]
    fn test_setting_lookup() {
        let preview = PreviewSection::default();
        assert_eq!(preview.setting("showAgentTracer"), Value::Bool(true));
        assert_eq!(preview.setting("nope"), Value::Null);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agentview.toml");
        std::fs::write(
            &path,
            r#"
[app]
project_root = "/ws"

[preview]
show_agent_tracer = false

[connections]
username = "dev@example.com"
client_apps = ["one", "two"]

[[runtime.bots]]
id = "0Xx000000000001"
developer_name = "Support_Bot"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.app.project_root(), PathBuf::from("/ws"));
        assert!(!cfg.preview.show_agent_tracer);
        assert_eq!(cfg.connections.client_apps.len(), 2);
        assert_eq!(cfg.runtime.bots[0].label(), "Support_Bot");
    }
}
