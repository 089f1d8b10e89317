//! 内存缓存实现：测试与单机免依赖运行
//! In-memory cache: tests and dependency-free single-node runs

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MessageCache, MessageInboxCache, UserConnectionCache, CONNECTION_TTL_SECS};
use crate::domain::Message;
use crate::error::Result;

#[derive(Default)]
struct Inner {
    inboxes: HashMap<String, Vec<String>>,
    connections: HashMap<String, (String, Instant)>,
    messages: HashMap<String, Message>,
}

#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageInboxCache for MemoryCache {
    async fn add_to_inbox(&self, user_id: &str, message_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .inboxes
            .entry(user_id.to_string())
            .or_default()
            .push(message_id.to_string());
        Ok(())
    }

    async fn get_inbox(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .inboxes
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_from_inbox(&self, user_id: &str, message_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(list) = inner.inboxes.get_mut(user_id) {
            if let Some(pos) = list.iter().position(|id| id == message_id) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn clear_inbox(&self, user_id: &str) -> Result<()> {
        self.inner.lock().inboxes.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl UserConnectionCache for MemoryCache {
    async fn set_user_connection(&self, user_id: &str, server_id: &str) -> Result<()> {
        self.inner
            .lock()
            .connections
            .insert(user_id.to_string(), (server_id.to_string(), Instant::now()));
        Ok(())
    }

    async fn is_user_online(&self, user_id: &str) -> Result<bool> {
        Ok(self.entry_alive(user_id))
    }

    async fn remove_user_connection(&self, user_id: &str) -> Result<()> {
        self.inner.lock().connections.remove(user_id);
        Ok(())
    }

    async fn get_user_server_id(&self, user_id: &str) -> Result<Option<String>> {
        if !self.entry_alive(user_id) {
            return Ok(None);
        }
        Ok(self
            .inner
            .lock()
            .connections
            .get(user_id)
            .map(|(sid, _)| sid.clone()))
    }
}

impl MemoryCache {
    fn entry_alive(&self, user_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get(user_id) {
            Some((_, at)) if at.elapsed().as_secs() < CONNECTION_TTL_SECS => true,
            Some(_) => {
                inner.connections.remove(user_id);
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl MessageCache for MemoryCache {
    async fn cache_message(&self, msg: &Message) -> Result<()> {
        self.inner
            .lock()
            .messages
            .insert(msg.message_id.clone(), msg.clone());
        Ok(())
    }

    async fn get_cached_message(&self, message_id: &str) -> Result<Option<Message>> {
        Ok(self.inner.lock().messages.get(message_id).cloned())
    }

    async fn remove_cached_message(&self, message_id: &str) -> Result<()> {
        self.inner.lock().messages.remove(message_id);
        Ok(())
    }
}
