//! 消息队列 / Message queue
//!
//! 入口与分发器之间的持久FIFO交接：手动确认，至少一次投递，
//! 超过重投上限的条目转入死信
//! Durable FIFO handoff between ingress and dispatcher: manual ack,
//! at-least-once delivery, entries past the redelivery cap go to dead-letter

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::domain::QueueItem;
use crate::error::Result;

/// 一次投递 / One delivery
///
/// `delivery_count` 含本次；重投条目计数递增
/// `delivery_count` includes this attempt; redeliveries increment it
#[derive(Clone, Debug)]
pub struct Delivery {
    pub delivery_id: String,
    pub item: QueueItem,
    pub delivery_count: u64,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 持久入队；失败上抛触发入口补偿 / Durable enqueue; failure bubbles to the
    /// ingress compensator
    async fn publish(&self, item: &QueueItem) -> Result<()>;

    /// 拉取一批投递（FIFO，含到期重投）；空队列时最多阻塞实现配置的时长
    /// Fetch a batch (FIFO, including due redeliveries); blocks up to the
    /// implementation's configured duration when empty
    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>>;

    /// 处理成功后的手动确认 / Manual ack after successful handling
    async fn ack(&self, delivery_id: &str) -> Result<()>;

    /// 处理失败：重新排队，超过上限转死信
    /// Handling failed: requeue, or dead-letter past the cap
    async fn nack(&self, delivery_id: &str) -> Result<()>;
}
