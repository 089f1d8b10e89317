//! Redis 缓存实现 / Redis cache implementation
//!
//! ConnectionManager 自动重连；每次操作套超时，超时同样归为缓存操作失败
//! ConnectionManager reconnects automatically; every operation runs under a
//! timeout that also maps to a cache operation failure

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::{
    connection_key, inbox_key, message_key, MessageCache, MessageInboxCache, UserConnectionCache,
    CONNECTION_TTL_SECS, INBOX_TTL_SECS, MESSAGE_TTL_SECS,
};
use crate::domain::Message;
use crate::error::{RelayError, Result};

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCache {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| RelayError::cache_failed("connect", url.to_string(), e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RelayError::cache_failed("connect", url.to_string(), e))?;
        Ok(Self { conn, op_timeout })
    }

    async fn run<T, F>(&self, op: &'static str, key: String, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(RelayError::cache_failed(op, key, e)),
            Err(_) => Err(RelayError::cache_failed(op, key, "operation timed out")),
        }
    }
}

#[async_trait]
impl MessageInboxCache for RedisCache {
    async fn add_to_inbox(&self, user_id: &str, message_id: &str) -> Result<()> {
        let key = inbox_key(user_id);
        let mut conn = self.conn.clone();
        let message_id = message_id.to_string();
        self.run("add_to_inbox", key.clone(), async move {
            // 追加并顺带续期 / append and refresh the TTL alongside
            redis::pipe()
                .rpush(&key, &message_id)
                .ignore()
                .expire(&key, INBOX_TTL_SECS as i64)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn get_inbox(&self, user_id: &str) -> Result<Vec<String>> {
        let key = inbox_key(user_id);
        let mut conn = self.conn.clone();
        self.run("get_inbox", key.clone(), async move {
            conn.lrange(&key, 0, -1).await
        })
        .await
    }

    async fn remove_from_inbox(&self, user_id: &str, message_id: &str) -> Result<()> {
        let key = inbox_key(user_id);
        let mut conn = self.conn.clone();
        let message_id = message_id.to_string();
        self.run("remove_from_inbox", key.clone(), async move {
            conn.lrem(&key, 1, &message_id).await
        })
        .await
        .map(|_: i64| ())
    }

    async fn clear_inbox(&self, user_id: &str) -> Result<()> {
        let key = inbox_key(user_id);
        let mut conn = self.conn.clone();
        self.run("clear_inbox", key.clone(), async move { conn.del(&key).await })
            .await
            .map(|_: i64| ())
    }
}

#[async_trait]
impl UserConnectionCache for RedisCache {
    async fn set_user_connection(&self, user_id: &str, server_id: &str) -> Result<()> {
        let key = connection_key(user_id);
        let mut conn = self.conn.clone();
        let server_id = server_id.to_string();
        self.run("set_user_connection", key.clone(), async move {
            conn.set_ex(&key, &server_id, CONNECTION_TTL_SECS).await
        })
        .await
    }

    async fn is_user_online(&self, user_id: &str) -> Result<bool> {
        let key = connection_key(user_id);
        let mut conn = self.conn.clone();
        self.run("is_user_online", key.clone(), async move {
            conn.exists(&key).await
        })
        .await
    }

    async fn remove_user_connection(&self, user_id: &str) -> Result<()> {
        let key = connection_key(user_id);
        let mut conn = self.conn.clone();
        self.run("remove_user_connection", key.clone(), async move {
            conn.del(&key).await
        })
        .await
        .map(|_: i64| ())
    }

    async fn get_user_server_id(&self, user_id: &str) -> Result<Option<String>> {
        let key = connection_key(user_id);
        let mut conn = self.conn.clone();
        self.run("get_user_server_id", key.clone(), async move {
            conn.get(&key).await
        })
        .await
    }
}

#[async_trait]
impl MessageCache for RedisCache {
    async fn cache_message(&self, msg: &Message) -> Result<()> {
        let key = message_key(&msg.message_id);
        let mut conn = self.conn.clone();
        let fields = [
            ("senderId", msg.sender_id.clone()),
            ("receiverId", msg.receiver_id.clone()),
            ("content", msg.content.clone()),
            ("timestamp", msg.timestamp.to_string()),
        ];
        self.run("cache_message", key.clone(), async move {
            redis::pipe()
                .hset_multiple(&key, &fields)
                .ignore()
                .expire(&key, MESSAGE_TTL_SECS as i64)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn get_cached_message(&self, message_id: &str) -> Result<Option<Message>> {
        let key = message_key(message_id);
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = self
            .run("get_cached_message", key.clone(), async move {
                conn.hgetall(&key).await
            })
            .await?;
        if map.is_empty() {
            return Ok(None);
        }
        let timestamp = map
            .get("timestamp")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or_default();
        Ok(Some(Message {
            message_id: message_id.to_string(),
            sender_id: map.get("senderId").cloned().unwrap_or_default(),
            receiver_id: map.get("receiverId").cloned().unwrap_or_default(),
            content: map.get("content").cloned().unwrap_or_default(),
            timestamp,
            undelivered: true,
            delivered_at: None,
            read_at: None,
        }))
    }

    async fn remove_cached_message(&self, message_id: &str) -> Result<()> {
        let key = message_key(message_id);
        let mut conn = self.conn.clone();
        self.run("remove_cached_message", key.clone(), async move {
            conn.del(&key).await
        })
        .await
        .map(|_: i64| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 需要本地Redis，集成测试默认忽略 / Needs a live redis, ignored by default
    #[tokio::test]
    #[ignore]
    async fn redis_inbox_roundtrip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let cache = RedisCache::connect(&url, Duration::from_secs(3))
            .await
            .expect("redis client");
        let user = format!("u_test_{}", uuid::Uuid::new_v4());
        cache.add_to_inbox(&user, "m1").await.expect("rpush");
        cache.add_to_inbox(&user, "m2").await.expect("rpush");
        assert_eq!(cache.get_inbox(&user).await.expect("lrange"), vec!["m1", "m2"]);
        cache.remove_from_inbox(&user, "m1").await.expect("lrem");
        assert_eq!(cache.get_inbox(&user).await.expect("lrange"), vec!["m2"]);
        cache.clear_inbox(&user).await.expect("del");
    }
}
