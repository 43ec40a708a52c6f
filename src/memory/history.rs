//! 对话与追踪历史存储
//!
//! 按 Agent 身份分目录：`<root>/<storage_key>/transcript.jsonl` 与 `traces.jsonl`，每行一条 JSON。
//! 读取结果驱动 UI 上下文标志 hasConversationData / hasTraceData；清除时目录与标志一并清掉。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::agent::AgentIdentity;
use crate::core::PreviewError;
use crate::host::{keys, ContextSink};

const TRANSCRIPT_FILE: &str = "transcript.jsonl";
const TRACES_FILE: &str = "traces.jsonl";

/// 消息发送方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// 对话消息（创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub role: MessageRole,
    pub content: String,
    /// 毫秒时间戳
    pub timestamp: i64,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 追踪记录（按 Agent 只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub storage_key: String,
    pub agent_id: String,
    pub session_id: String,
    pub plan_id: String,
    pub timestamp: i64,
    pub trace: Value,
}

/// 对话历史查询结果：缺失或为空时是 NotFound，而不是空列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLookup {
    Found(Vec<ConversationMessage>),
    NotFound,
}

/// 磁盘上的一行对话记录；text 可能缺失（如仅含元数据的记录）
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptEntry {
    #[serde(default)]
    id: Option<String>,
    role: MessageRole,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    session_id: Option<String>,
}

pub struct HistoryStore {
    root: PathBuf,
    context: Arc<dyn ContextSink>,
}

impl HistoryStore {
    pub fn new(root: impl AsRef<Path>, context: Arc<dyn ContextSink>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            context,
        }
    }

    pub fn agent_dir(&self, identity: &AgentIdentity) -> PathBuf {
        self.root.join(identity.storage_key())
    }

    /// 读取对话；无文本的记录被跳过，结果按时间戳稳定排序
    pub async fn load_conversation(&self, identity: &AgentIdentity) -> Result<HistoryLookup, PreviewError> {
        let path = self.agent_dir(identity).join(TRANSCRIPT_FILE);
        let entries: Vec<TranscriptEntry> = read_jsonl(&path).await?;

        let mut messages: Vec<ConversationMessage> = entries
            .into_iter()
            .filter_map(|e| {
                let content = e.text.filter(|t| !t.trim().is_empty())?;
                Some(ConversationMessage {
                    id: e.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    role: e.role,
                    content,
                    timestamp: e.timestamp,
                })
            })
            .collect();
        messages.sort_by_key(|m| m.timestamp);

        let found = !messages.is_empty();
        self.context.set_context(keys::HAS_CONVERSATION_DATA, found);
        Ok(if found {
            HistoryLookup::Found(messages)
        } else {
            HistoryLookup::NotFound
        })
    }

    /// 读取追踪；总是返回列表（可能为空）
    pub async fn load_trace(&self, identity: &AgentIdentity) -> Result<Vec<TraceEntry>, PreviewError> {
        let path = self.agent_dir(identity).join(TRACES_FILE);
        let entries: Vec<TraceEntry> = read_jsonl(&path).await?;
        self.context.set_context(keys::HAS_TRACE_DATA, !entries.is_empty());
        Ok(entries)
    }

    pub async fn latest_trace(&self, identity: &AgentIdentity) -> Result<Option<TraceEntry>, PreviewError> {
        Ok(self.load_trace(identity).await?.pop())
    }

    pub async fn append_message(
        &self,
        identity: &AgentIdentity,
        session_id: &str,
        message: &ConversationMessage,
    ) -> Result<(), PreviewError> {
        let entry = TranscriptEntry {
            id: Some(message.id.clone()),
            role: message.role,
            text: Some(message.content.clone()),
            timestamp: message.timestamp,
            session_id: Some(session_id.to_string()),
        };
        append_jsonl(&self.agent_dir(identity).join(TRANSCRIPT_FILE), &entry).await?;
        self.context.set_context(keys::HAS_CONVERSATION_DATA, true);
        Ok(())
    }

    pub async fn append_trace(&self, identity: &AgentIdentity, entry: &TraceEntry) -> Result<(), PreviewError> {
        append_jsonl(&self.agent_dir(identity).join(TRACES_FILE), entry).await?;
        self.context.set_context(keys::HAS_TRACE_DATA, true);
        Ok(())
    }

    /// 删除该 Agent 的历史目录（不存在也视为成功），并同时清掉两个可用性标志
    pub async fn clear(&self, identity: &AgentIdentity) -> Result<(), PreviewError> {
        let dir = self.agent_dir(identity);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.context.set_context(keys::HAS_CONVERSATION_DATA, false);
        self.context.set_context(keys::HAS_TRACE_DATA, false);
        tracing::info!("Cleared history for {}", identity.storage_key());
        Ok(())
    }

    /// 导出对话为 Markdown，返回写入的文件路径
    pub async fn export_markdown(&self, identity: &AgentIdentity, dest_dir: &Path) -> Result<PathBuf, PreviewError> {
        let messages = match self.load_conversation(identity).await? {
            HistoryLookup::Found(m) => m,
            HistoryLookup::NotFound => Vec::new(),
        };

        let mut out = format!("# Conversation with {}\n\n", identity.display_name());
        out.push_str(&format!(
            "_Exported {}_\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        for m in &messages {
            let who = match m.role {
                MessageRole::User => "User",
                MessageRole::Agent => "Agent",
            };
            let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(m.timestamp)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            out.push_str(&format!("**{}** ({})\n\n{}\n\n", who, when, m.content.trim()));
        }

        fs::create_dir_all(dest_dir).await?;
        let file = dest_dir.join(format!(
            "{}-{}.md",
            identity.storage_key(),
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        ));
        fs::write(&file, out).await?;
        Ok(file)
    }
}

/// 读取 JSON 行文件；文件不存在时返回空列表，无法解析的行记录日志后跳过
async fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, PreviewError> {
    let text = match fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(v) => out.push(v),
            Err(e) => tracing::warn!("Skipping line {} of {:?}: {}", n + 1, path, e),
        }
    }
    Ok(out)
}

async fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), PreviewError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ContextFlags;
    use serde_json::json;
    use tempfile::TempDir;

    fn local() -> AgentIdentity {
        AgentIdentity::Local {
            file_path: PathBuf::from("/ws/a.agent"),
        }
    }

    fn store(dir: &TempDir) -> (HistoryStore, Arc<ContextFlags>) {
        let flags = Arc::new(ContextFlags::default());
        (HistoryStore::new(dir.path(), flags.clone()), flags)
    }

    #[tokio::test]
    async fn test_missing_transcript_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (store, flags) = store(&dir);

        let result = store.load_conversation(&local()).await.unwrap();
        assert_eq!(result, HistoryLookup::NotFound);
        assert_eq!(flags.get(keys::HAS_CONVERSATION_DATA), Some(false));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (store, flags) = store(&dir);
        let agent_dir = store.agent_dir(&local());
        fs::create_dir_all(&agent_dir).await.unwrap();
        fs::write(agent_dir.join(TRANSCRIPT_FILE), "").await.unwrap();

        assert_eq!(store.load_conversation(&local()).await.unwrap(), HistoryLookup::NotFound);
        assert_eq!(flags.get(keys::HAS_CONVERSATION_DATA), Some(false));
    }

    #[tokio::test]
    async fn test_entry_without_text_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (store, flags) = store(&dir);
        let agent_dir = store.agent_dir(&local());
        fs::create_dir_all(&agent_dir).await.unwrap();
        let lines = [
            json!({"role": "user", "text": "hello", "timestamp": 1}).to_string(),
            json!({"role": "agent", "timestamp": 2}).to_string(),
        ];
        fs::write(agent_dir.join(TRANSCRIPT_FILE), lines.join("\n")).await.unwrap();

        match store.load_conversation(&local()).await.unwrap() {
            HistoryLookup::Found(messages) => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].content, "hello");
                assert_eq!(messages[0].role, MessageRole::User);
            }
            HistoryLookup::NotFound => panic!("expected history"),
        }
        assert_eq!(flags.get(keys::HAS_CONVERSATION_DATA), Some(true));
    }

    #[tokio::test]
    async fn test_trace_always_list_and_clear_resets_both() {
        let dir = TempDir::new().unwrap();
        let (store, flags) = store(&dir);
        let identity = local();

        assert!(store.load_trace(&identity).await.unwrap().is_empty());

        let entry = TraceEntry {
            storage_key: identity.storage_key(),
            agent_id: identity.encoded(),
            session_id: "s1".into(),
            plan_id: "p1".into(),
            timestamp: 10,
            trace: json!({"steps": []}),
        };
        store.append_trace(&identity, &entry).await.unwrap();
        store
            .append_message(&identity, "s1", &ConversationMessage::new(MessageRole::User, "hi"))
            .await
            .unwrap();
        assert_eq!(store.load_trace(&identity).await.unwrap(), vec![entry]);
        assert_eq!(flags.get(keys::HAS_TRACE_DATA), Some(true));

        store.clear(&identity).await.unwrap();
        assert!(!store.agent_dir(&identity).exists());
        assert_eq!(flags.get(keys::HAS_TRACE_DATA), Some(false));
        assert_eq!(flags.get(keys::HAS_CONVERSATION_DATA), Some(false));

        // 再次清除：目录已不存在也不报错
        store.clear(&identity).await.unwrap();
    }

    #[tokio::test]
    async fn test_export_markdown() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let identity = local();
        store
            .append_message(&identity, "s1", &ConversationMessage::new(MessageRole::User, "ping"))
            .await
            .unwrap();
        store
            .append_message(&identity, "s1", &ConversationMessage::new(MessageRole::Agent, "pong"))
            .await
            .unwrap();

        let out_dir = dir.path().join("exports");
        let path = store.export_markdown(&identity, &out_dir).await.unwrap();
        let text = fs::read_to_string(path).await.unwrap();
        assert!(text.contains("**User**"));
        assert!(text.contains("pong"));
    }
}
