//! 会话状态：唯一的 SessionHandle、当前代际令牌与会话级字段
//!
//! 所有字段由编排器独占，只在持锁的短临界区内修改，临界区从不跨越运行时调用。
//! 取消靠代际比较实现：每次 start/end 都会让代际 +1，挂起中的旧启动在恢复点发现代际已变即放弃。

use std::sync::Arc;

use serde::Serialize;

use crate::agent::AgentIdentity;
use crate::host::Connection;
use crate::runtime::{AgentSession, SessionKind};

/// 状态机阶段（投影用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Starting,
    Active,
    Ending,
}

/// 活动（或启动中）的会话
pub struct SessionHandle {
    pub session: Arc<dyn AgentSession>,
    /// start 成功后才有
    pub session_id: Option<String>,
    pub identity: AgentIdentity,
    pub kind: SessionKind,
    pub connection: Option<Connection>,
    pub starting: bool,
    pub generation: u64,
}

impl SessionHandle {
    pub fn is_active(&self) -> bool {
        !self.starting && self.session_id.is_some()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("starting", &self.starting)
            .field("generation", &self.generation)
            .finish()
    }
}

/// 进行中的启动请求
#[derive(Debug, Clone)]
pub struct PendingStart {
    pub identity: AgentIdentity,
    pub generation: u64,
}

/// 启动失败时恢复的会话级字段
#[derive(Debug, Clone, Default)]
pub struct Rollback {
    pub current_agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub plan_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub handle: Option<SessionHandle>,
    pub pending: Option<PendingStart>,
    pub generation: u64,
    pub ending: bool,
    /// 最近一次 send 返回的 plan id（追踪用）
    pub plan_id: Option<String>,
    pub current_agent_id: Option<String>,
    pub agent_name: Option<String>,
    /// 通过 setSelectedAgentId / setAgentId 预选的 Agent
    pub preselected_agent_id: Option<String>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        if self.ending {
            return SessionPhase::Ending;
        }
        match (&self.handle, &self.pending) {
            (Some(h), _) if h.is_active() => SessionPhase::Active,
            (_, Some(_)) => SessionPhase::Starting,
            (Some(_), None) => SessionPhase::Starting,
            (None, None) => SessionPhase::Idle,
        }
    }

    /// 铸造新代际；之前所有挂起的启动随之失效
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn active_handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref().filter(|h| h.is_active())
    }

    /// 启动目标：显式启动过的 Agent 优先，其次预选
    pub fn target_agent_id(&self) -> Option<String> {
        self.current_agent_id
            .clone()
            .or_else(|| self.preselected_agent_id.clone())
    }

    pub fn rollback_point(&self) -> Rollback {
        Rollback {
            current_agent_id: self.current_agent_id.clone(),
            agent_name: self.agent_name.clone(),
            plan_id: self.plan_id.clone(),
        }
    }

    pub fn restore(&mut self, rollback: Rollback) {
        self.current_agent_id = rollback.current_agent_id;
        self.agent_name = rollback.agent_name;
        self.plan_id = rollback.plan_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_monotonic() {
        let mut st = SessionState::default();
        let a = st.next_generation();
        let b = st.next_generation();
        assert!(b > a);
        assert!(!st.is_current(a));
        assert!(st.is_current(b));
    }

    #[test]
    fn test_phase_projection() {
        let mut st = SessionState::default();
        assert_eq!(st.phase(), SessionPhase::Idle);
        st.pending = Some(PendingStart {
            identity: AgentIdentity::Published {
                bot_id: "0Xx000000000001".into(),
            },
            generation: 1,
        });
        assert_eq!(st.phase(), SessionPhase::Starting);
        st.ending = true;
        assert_eq!(st.phase(), SessionPhase::Ending);
    }

    #[test]
    fn test_rollback_restores_fields() {
        let mut st = SessionState {
            current_agent_id: Some("local:/a.agent".into()),
            agent_name: Some("a".into()),
            plan_id: Some("p1".into()),
            ..Default::default()
        };
        let point = st.rollback_point();
        st.current_agent_id = Some("0Xx000000000001".into());
        st.agent_name = Some("b".into());
        st.plan_id = None;

        st.restore(point);
        assert_eq!(st.agent_name.as_deref(), Some("a"));
        assert_eq!(st.plan_id.as_deref(), Some("p1"));
    }
}
