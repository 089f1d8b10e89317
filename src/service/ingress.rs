//! 入口路径：校验、落库、入队；发布失败时补偿删除
//! Ingress path: validate, persist, enqueue; compensating delete on publish
//! failure

use tracing::{debug, error};

use crate::domain::event::SendMessagePayload;
use crate::domain::message::validate_content;
use crate::domain::{Message, QueueItem};
use crate::error::{RelayError, Result};
use crate::server::RelayImServer;

impl RelayImServer {
    /// 接收一条定向消息；`sender_id` 来自会话绑定，绝不取自载荷
    /// Accept a directed message; `sender_id` comes from the session binding,
    /// never the payload
    pub async fn ingest_message(
        &self,
        sender_id: &str,
        payload: &SendMessagePayload,
    ) -> Result<Message> {
        if payload.receiver_id.is_empty() {
            return Err(RelayError::validation("receiver_id", "must not be empty"));
        }
        validate_content(&payload.content)?;

        let msg = self.store.create(
            sender_id,
            &payload.receiver_id,
            &payload.content,
            payload.timestamp,
        )?;
        debug!("💾 Stored message {} for {}", msg.message_id, msg.receiver_id);

        let item = QueueItem::from_message(&msg);
        if let Err(publish_err) = self.queue.publish(&item).await {
            // 补偿窗口：存储里短暂存在无队列项的行 / compensation window: a row
            // with no queue item, briefly
            if let Err(delete_err) = self.store.delete_by_id(&msg.message_id) {
                error!(
                    "❌ Compensation failed for message {} (sender {}): publish: {}, delete: {}",
                    msg.message_id, sender_id, publish_err, delete_err
                );
            } else {
                debug!("🧯 Compensated: deleted unpublished message {}", msg.message_id);
            }
            return Err(publish_err);
        }
        Ok(msg)
    }
}
