//! Agent 身份与连接上下文：身份分类/校验、客户端应用解析

pub mod client_app;
pub mod identity;

pub use client_app::{ClientAppResolution, ClientAppResolver};
pub use identity::{classify, encode_local, resolve, validate_published, AgentIdentity, AgentSource};
