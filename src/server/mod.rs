use std::sync::Arc;

use crate::cache::{MessageCache, MessageInboxCache, UserConnectionCache};
use crate::config::Settings;
use crate::queue::MessageQueue;
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

/// 服务端全局状态 / Server global state
///
/// 组装根：注册表、存储、缓存与队列的唯一获取路径
/// Composition root: the single acquisition path for registry, store, caches
/// and queue
#[derive(Clone)]
pub struct RelayImServer {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<MessageStore>,
    pub inbox: Arc<dyn MessageInboxCache>,
    pub presence: Arc<dyn UserConnectionCache>,
    pub msg_cache: Arc<dyn MessageCache>,
    pub queue: Arc<dyn MessageQueue>,
}

impl RelayImServer {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<MessageStore>,
        inbox: Arc<dyn MessageInboxCache>,
        presence: Arc<dyn UserConnectionCache>,
        msg_cache: Arc<dyn MessageCache>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            settings,
            registry: Arc::new(ConnectionRegistry::new()),
            store,
            inbox,
            presence,
            msg_cache,
            queue,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.settings.server.server_id
    }
}
