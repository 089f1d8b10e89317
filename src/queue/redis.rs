//! Redis Streams 队列实现 / Redis Streams queue implementation
//!
//! 消费组加手动XACK承载至少一次语义；未确认条目闲置超时后由认领扫描重投，
//! 超过重投上限的条目转入死信流
//! Consumer group plus manual XACK carry the at-least-once semantics; unacked
//! entries are redelivered by the reclaim pass once idle, and entries past
//! the redelivery cap move to the dead-letter stream

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};

use super::{Delivery, MessageQueue};
use crate::domain::QueueItem;
use crate::error::{RelayError, Result};

const PAYLOAD_FIELD: &str = "payload";

pub struct RedisStreamQueue {
    conn: ConnectionManager,
    stream: String,
    dead_stream: String,
    group: String,
    consumer: String,
    max_deliveries: u64,
    block: Duration,
    min_idle: Duration,
}

impl RedisStreamQueue {
    pub async fn connect(
        url: &str,
        stream: &str,
        consumer: &str,
        max_deliveries: u64,
        block: Duration,
        min_idle: Duration,
    ) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;
        let queue = Self {
            conn,
            stream: stream.to_string(),
            dead_stream: format!("{}.dead", stream),
            group: "relay-im".to_string(),
            consumer: consumer.to_string(),
            max_deliveries,
            block,
            min_idle,
        };
        queue.init().await?;
        Ok(queue)
    }

    /// 建组（幂等，已存在则忽略）/ Create the consumer group (idempotent,
    /// BUSYGROUP ignored)
    async fn init(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RelayError::QueueConsumeFailed(e.to_string())),
        }
    }

    /// 认领闲置的未确认条目；超上限者转死信
    /// Reclaim idle unacked entries; past-cap ones are dead-lettered
    async fn reclaim_pending(&self, max: usize) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.min_idle.as_millis() as u64)
            .arg("-")
            .arg("+")
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for (entry_id, _owner, _idle, prior_deliveries) in pending {
            let claimed: Vec<(String, std::collections::HashMap<String, String>)> =
                redis::cmd("XCLAIM")
                    .arg(&self.stream)
                    .arg(&self.group)
                    .arg(&self.consumer)
                    .arg(self.min_idle.as_millis() as u64)
                    .arg(&entry_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;
            // 已被其他消费者抢先认领 / beaten to the claim by another consumer
            let Some((id, fields)) = claimed.into_iter().next() else {
                continue;
            };
            let Some(payload) = fields.get(PAYLOAD_FIELD) else {
                tracing::error!("⚠️  queue entry {} has no payload field, dead-lettering", id);
                self.move_to_dead(&mut conn, &id, "{}").await?;
                continue;
            };
            if prior_deliveries >= self.max_deliveries {
                tracing::warn!(
                    "☠️  queue entry {} exceeded {} deliveries, dead-lettered",
                    id,
                    self.max_deliveries
                );
                self.move_to_dead(&mut conn, &id, payload).await?;
                continue;
            }
            match serde_json::from_str::<QueueItem>(payload) {
                Ok(item) => out.push(Delivery {
                    delivery_id: id,
                    item,
                    delivery_count: prior_deliveries + 1,
                }),
                Err(e) => {
                    // 解码失败不丢弃：留在未确认集合里等待下一轮，由上限兜底
                    // Decode failures are not dropped: the entry stays pending
                    // for another round, bounded by the delivery cap
                    tracing::error!("⚠️  undecodable queue payload at {}: {}", id, e);
                }
            }
        }
        Ok(out)
    }

    async fn move_to_dead(
        &self,
        conn: &mut ConnectionManager,
        entry_id: &str,
        payload: &str,
    ) -> Result<()> {
        let _: String = conn
            .xadd(&self.dead_stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(entry_id)
            .query_async(conn)
            .await
            .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisStreamQueue {
    async fn publish(&self, item: &QueueItem) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload =
            serde_json::to_string(item).map_err(|e| RelayError::QueuePublishFailed(e.to_string()))?;
        let _: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload.as_str())])
            .await
            .map_err(|e| RelayError::QueuePublishFailed(e.to_string()))?;
        Ok(())
    }

    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>> {
        // 先重投到期的未确认条目，再读新条目
        // Due redeliveries first, then fresh entries
        let reclaimed = self.reclaim_pending(max).await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max)
            .block(self.block.as_millis() as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[self.stream.as_str()], &[">"], &opts)
            .await
            .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;

        let mut out = Vec::new();
        for stream_reply in reply.keys {
            for entry in stream_reply.ids {
                let Some(raw) = entry.map.get(PAYLOAD_FIELD) else {
                    tracing::error!("⚠️  queue entry {} has no payload field", entry.id);
                    continue;
                };
                let Ok(payload) = redis::from_redis_value::<String>(raw) else {
                    tracing::error!("⚠️  queue entry {} payload is not a string", entry.id);
                    continue;
                };
                match serde_json::from_str::<QueueItem>(&payload) {
                    Ok(item) => out.push(Delivery {
                        delivery_id: entry.id.to_string(),
                        item,
                        delivery_count: 1,
                    }),
                    Err(e) => {
                        // 留在未确认集合，走重投与死信路径 / stays pending for the
                        // reclaim and dead-letter path
                        tracing::error!("⚠️  undecodable queue payload at {}: {}", entry.id, e);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn ack(&self, delivery_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(delivery_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| RelayError::QueueConsumeFailed(e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, delivery_id: &str) -> Result<()> {
        // 不确认即保留在未确认集合；闲置超时后由认领扫描重投
        // Not acking keeps the entry pending; the reclaim pass redelivers it
        // once idle
        tracing::debug!("🔁 queue entry {} left pending for redelivery", delivery_id);
        Ok(())
    }
}
