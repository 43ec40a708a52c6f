//! Agent 身份解析
//!
//! 身份种类完全由字符串形状决定：
//! - `local:<path>`：本地脚本 Agent，去掉前缀即为文件路径
//! - 其余一律视为已发布 Agent（Bot ID），格式在校验阶段检查，分类本身从不失败

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::PreviewError;

/// 本地 Agent 的字符串前缀
pub const LOCAL_PREFIX: &str = "local:";

/// 已发布 Agent ID 的固定两字符前缀
pub const PUBLISHED_PREFIX: &str = "0X";

/// 已发布 Agent ID 允许的长度（15 位或 18 位）
const PUBLISHED_LENGTHS: [usize; 2] = [15, 18];

/// Agent 身份：本地脚本或已发布
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentIdentity {
    Local { file_path: PathBuf },
    Published { bot_id: String },
}

/// Agent 来源（随 availableAgents 发往 UI）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSource {
    Script,
    Published,
}

impl AgentIdentity {
    pub fn source(&self) -> AgentSource {
        match self {
            AgentIdentity::Local { .. } => AgentSource::Script,
            AgentIdentity::Published { .. } => AgentSource::Published,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AgentIdentity::Local { .. })
    }

    /// 编码回 UI / 偏好存储使用的字符串形式
    pub fn encoded(&self) -> String {
        match self {
            AgentIdentity::Local { file_path } => encode_local(file_path),
            AgentIdentity::Published { bot_id } => bot_id.clone(),
        }
    }

    /// 历史与追踪的存储键：本地 Agent 用文件名（去扩展名），已发布 Agent 用 Bot ID
    pub fn storage_key(&self) -> String {
        match self {
            AgentIdentity::Local { file_path } => file_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_path.to_string_lossy().replace(['/', '\\'], "_")),
            AgentIdentity::Published { bot_id } => bot_id.clone(),
        }
    }

    /// 用于展示的名称（本地 Agent 为文件名）
    pub fn display_name(&self) -> String {
        self.storage_key()
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoded())
    }
}

/// 按字符串形状分类；总是成功
pub fn classify(id: &str) -> AgentIdentity {
    match id.strip_prefix(LOCAL_PREFIX) {
        Some(path) => AgentIdentity::Local {
            file_path: PathBuf::from(path),
        },
        None => AgentIdentity::Published {
            bot_id: id.to_string(),
        },
    }
}

pub fn encode_local(path: &Path) -> String {
    format!("{}{}", LOCAL_PREFIX, path.display())
}

/// 校验已发布 Agent ID：固定前缀 + 长度恰为 15 或 18
pub fn validate_published(id: &str) -> Result<(), PreviewError> {
    if id.starts_with(PUBLISHED_PREFIX) && PUBLISHED_LENGTHS.contains(&id.len()) {
        Ok(())
    } else {
        Err(PreviewError::InvalidAgentId(id.to_string()))
    }
}

/// 分类并校验，返回可用于启动会话的身份
pub fn resolve(id: &str) -> Result<AgentIdentity, PreviewError> {
    let identity = classify(id);
    match &identity {
        AgentIdentity::Local { file_path } => {
            if file_path.as_os_str().is_empty() {
                return Err(PreviewError::NoFilePathForLocalAgent(id.to_string()));
            }
        }
        AgentIdentity::Published { bot_id } => validate_published(bot_id)?,
    }
    Ok(identity)
}
