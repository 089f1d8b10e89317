//! 分发路径：单消费循环，按接收方在线与否选择即时投递或离线暂存
//! Dispatch path: single consumer loop choosing live delivery or offline
//! deposit per receiver presence

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::event;
use crate::domain::QueueItem;
use crate::error::Result;
use crate::server::RelayImServer;

/// 每轮拉取的批量 / Per-round fetch batch size
const FETCH_BATCH: usize = 16;

/// 长驻消费任务；单循环顺序处理，天然保持每接收方的入队顺序
/// Long-running consumer task; sequential single loop, which trivially keeps
/// per-receiver enqueue order
pub async fn run_dispatcher(server: Arc<RelayImServer>) {
    info!("🚚 Dispatcher consuming queue '{}'", server.settings.queue.name);
    loop {
        let batch = match server.queue.fetch(FETCH_BATCH).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("⚠️  Queue fetch failed, backing off: {}", e);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };
        for delivery in batch {
            match server.dispatch_one(&delivery.item).await {
                Ok(()) => {
                    if let Err(e) = server.queue.ack(&delivery.delivery_id).await {
                        warn!("⚠️  Ack failed for {}: {}", delivery.delivery_id, e);
                    }
                }
                Err(e) => {
                    warn!(
                        "🔁 Dispatch of message {} failed (attempt {}), requeueing: {}",
                        delivery.item.message_id, delivery.delivery_count, e
                    );
                    if let Err(e) = server.queue.nack(&delivery.delivery_id).await {
                        warn!("⚠️  Nack failed for {}: {}", delivery.delivery_id, e);
                    }
                }
            }
        }
    }
}

impl RelayImServer {
    /// 处理一个队列载荷；效果幂等，重投安全
    /// Handle one queue item; effects are idempotent, redelivery-safe
    pub async fn dispatch_one(&self, item: &QueueItem) -> Result<()> {
        let timestamp_ms = item.timestamp_millis()?;

        if self.presence.is_user_online(&item.receiver_id).await? {
            let envelope = event::incoming_message_from_item(item, timestamp_ms);
            if self.send_to_user(&item.receiver_id, &envelope) {
                debug!("⚡ Delivered {} live to {}", item.message_id, item.receiver_id);
                return Ok(());
            }
            // 在线提示过期或接收方在别的实例上，落入离线暂存
            // Presence was stale or the receiver sits on another instance;
            // fall through to the offline deposit
            debug!(
                "📭 Presence hint for {} was stale, depositing {}",
                item.receiver_id, item.message_id
            );
        }

        // 重投时避免重复追加 / avoid duplicate appends on redelivery
        let inbox = self.inbox.get_inbox(&item.receiver_id).await?;
        if !inbox.iter().any(|id| id == &item.message_id) {
            self.inbox
                .add_to_inbox(&item.receiver_id, &item.message_id)
                .await?;
        }

        let msg = crate::domain::Message {
            message_id: item.message_id.clone(),
            sender_id: item.sender_id.clone(),
            receiver_id: item.receiver_id.clone(),
            content: item.content.clone(),
            timestamp: timestamp_ms,
            undelivered: true,
            delivered_at: None,
            read_at: None,
        };
        // 快取失败只降级补投速度，不判定本次分发失败
        // A cache-message failure only slows the drain fast path; it does not
        // fail the dispatch
        if let Err(e) = self.msg_cache.cache_message(&msg).await {
            warn!("⚠️  cache_message for {} failed: {}", item.message_id, e);
        }
        debug!("📥 Deposited {} into inbox:{}", item.message_id, item.receiver_id);
        Ok(())
    }
}
