//! 收件箱缓存 / Inbox cache
//!
//! 三个窄契约在组装点组合；Redis 与内存实现可互换
//! Three narrow contracts composed at wire-up; redis and memory
//! implementations are interchangeable

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::domain::Message;
use crate::error::Result;

/// 在线提示TTL / Presence hint TTL
pub const CONNECTION_TTL_SECS: u64 = 3_600;
/// 收件箱TTL：长离线用户的积压必须存活 / Inbox TTL: a long-absent user's
/// backlog must survive
pub const INBOX_TTL_SECS: u64 = 31_536_000;
/// 消息快取TTL / Cached message TTL
pub const MESSAGE_TTL_SECS: u64 = 86_400;

pub fn connection_key(user_id: &str) -> String {
    format!("ws:connection:{}", user_id)
}

pub fn inbox_key(user_id: &str) -> String {
    format!("inbox:{}", user_id)
}

pub fn message_key(message_id: &str) -> String {
    format!("msg:{}", message_id)
}

/// 每接收方待投递列表，插入序即投递序
/// Per-receiver pending list; insertion order is delivery order
#[async_trait]
pub trait MessageInboxCache: Send + Sync {
    async fn add_to_inbox(&self, user_id: &str, message_id: &str) -> Result<()>;
    async fn get_inbox(&self, user_id: &str) -> Result<Vec<String>>;
    /// 仅移除首个匹配项 / Removes the first occurrence only
    async fn remove_from_inbox(&self, user_id: &str, message_id: &str) -> Result<()>;
    async fn clear_inbox(&self, user_id: &str) -> Result<()>;
}

/// 在线提示 / Presence hint
#[async_trait]
pub trait UserConnectionCache: Send + Sync {
    async fn set_user_connection(&self, user_id: &str, server_id: &str) -> Result<()>;
    async fn is_user_online(&self, user_id: &str) -> Result<bool>;
    async fn remove_user_connection(&self, user_id: &str) -> Result<()>;
    /// 跨实例寻址钩子 / Cross-instance addressing hook
    async fn get_user_server_id(&self, user_id: &str) -> Result<Option<String>>;
}

/// 短期消息快取，重连补投的快路径；存储仍是权威
/// Short-horizon message cache, fast path for the reconnect drain; the store
/// stays authoritative
#[async_trait]
pub trait MessageCache: Send + Sync {
    async fn cache_message(&self, msg: &Message) -> Result<()>;
    async fn get_cached_message(&self, message_id: &str) -> Result<Option<Message>>;
    async fn remove_cached_message(&self, message_id: &str) -> Result<()>;
}
