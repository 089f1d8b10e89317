//! 内存队列实现：与Redis Streams实现同契约，供测试与单机运行
//! In-memory queue: same contract as the redis streams one, for tests and
//! single-node runs

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Delivery, MessageQueue};
use crate::domain::QueueItem;
use crate::error::{RelayError, Result};

struct PendingItem {
    item: QueueItem,
    delivery_count: u64,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<PendingItem>,
    /// 已投出未确认 / Delivered, not yet acked
    unacked: HashMap<String, PendingItem>,
    dead: Vec<QueueItem>,
    next_id: u64,
}

pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_deliveries: u64,
    block: Duration,
}

impl MemoryQueue {
    pub fn new(max_deliveries: u64, block: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            max_deliveries,
            block,
        }
    }

    /// 死信快照（监控用）/ Dead-letter snapshot (for inspection)
    pub fn dead_letters(&self) -> Vec<QueueItem> {
        self.inner.lock().dead.clone()
    }

    pub fn unacked_count(&self) -> usize {
        self.inner.lock().unacked.len()
    }

    pub fn ready_count(&self) -> usize {
        self.inner.lock().ready.len()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn publish(&self, item: &QueueItem) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.ready.push_back(PendingItem {
                item: item.clone(),
                delivery_count: 0,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + self.block;
        loop {
            {
                let mut inner = self.inner.lock();
                if !inner.ready.is_empty() {
                    let mut out = Vec::new();
                    while out.len() < max {
                        let Some(mut pending) = inner.ready.pop_front() else {
                            break;
                        };
                        pending.delivery_count += 1;
                        let delivery_id = format!("mem-{}", inner.next_id);
                        inner.next_id += 1;
                        out.push(Delivery {
                            delivery_id: delivery_id.clone(),
                            item: pending.item.clone(),
                            delivery_count: pending.delivery_count,
                        });
                        inner.unacked.insert(delivery_id, pending);
                    }
                    return Ok(out);
                }
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
        }
    }

    async fn ack(&self, delivery_id: &str) -> Result<()> {
        let removed = self.inner.lock().unacked.remove(delivery_id);
        if removed.is_none() {
            return Err(RelayError::QueueConsumeFailed(format!(
                "unknown delivery id {}",
                delivery_id
            )));
        }
        Ok(())
    }

    async fn nack(&self, delivery_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(pending) = inner.unacked.remove(delivery_id) else {
            return Err(RelayError::QueueConsumeFailed(format!(
                "unknown delivery id {}",
                delivery_id
            )));
        };
        if pending.delivery_count >= self.max_deliveries {
            tracing::warn!(
                "☠️  message {} exceeded {} deliveries, dead-lettered",
                pending.item.message_id,
                self.max_deliveries
            );
            inner.dead.push(pending.item);
        } else {
            inner.ready.push_back(pending);
            drop(inner);
            self.notify.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> QueueItem {
        QueueItem {
            message_id: id.to_string(),
            sender_id: "u_a".into(),
            receiver_id: "u_b".into(),
            content: "hi".into(),
            timestamp: "2023-11-14T22:13:20+00:00".into(),
        }
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let q = MemoryQueue::new(5, Duration::from_millis(10));
        q.publish(&item("m1")).await.unwrap();
        q.publish(&item("m2")).await.unwrap();
        q.publish(&item("m3")).await.unwrap();
        let batch = q.fetch(10).await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|d| d.item.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn nack_requeues_with_incremented_count() {
        let q = MemoryQueue::new(5, Duration::from_millis(10));
        q.publish(&item("m1")).await.unwrap();
        let d = q.fetch(1).await.unwrap().remove(0);
        assert_eq!(d.delivery_count, 1);
        q.nack(&d.delivery_id).await.unwrap();
        let d = q.fetch(1).await.unwrap().remove(0);
        assert_eq!(d.delivery_count, 2);
        q.ack(&d.delivery_id).await.unwrap();
        assert_eq!(q.unacked_count(), 0);
        assert_eq!(q.ready_count(), 0);
    }

    #[tokio::test]
    async fn poison_message_dead_letters_after_cap() {
        let q = MemoryQueue::new(2, Duration::from_millis(10));
        q.publish(&item("m1")).await.unwrap();
        for _ in 0..2 {
            let d = q.fetch(1).await.unwrap().remove(0);
            q.nack(&d.delivery_id).await.unwrap();
        }
        assert!(q.fetch(1).await.unwrap().is_empty());
        let dead = q.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id, "m1");
    }

    #[tokio::test]
    async fn empty_fetch_returns_after_block() {
        let q = MemoryQueue::new(5, Duration::from_millis(20));
        assert!(q.fetch(1).await.unwrap().is_empty());
    }
}
