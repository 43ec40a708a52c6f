//! 持久化层：对话/追踪历史、进程级偏好

pub mod history;
pub mod preferences;

pub use history::{ConversationMessage, HistoryLookup, HistoryStore, MessageRole, TraceEntry};
pub use preferences::{PreferenceStore, Preferences};
