//! 送达确认：标记已送达并移出收件箱；移除失败则回滚标记
//! Delivery acknowledgment: mark delivered and remove from the inbox; the
//! mark is rolled back when the removal fails

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::server::RelayImServer;

impl RelayImServer {
    /// 宁重不丢：回滚后接收方可能在下次补投时再收到一次
    /// Duplicate over loss: after a rollback the receiver may see the message
    /// again on the next drain
    pub async fn acknowledge_delivery(&self, user_id: &str, message_id: &str) -> Result<()> {
        self.store.mark_delivered(message_id)?;

        if let Err(remove_err) = self.inbox.remove_from_inbox(user_id, message_id).await {
            if let Err(revert_err) = self.store.mark_undelivered(message_id) {
                error!(
                    "❌ Ack compensation failed for message {} (user {}): remove: {}, revert: {}",
                    message_id, user_id, remove_err, revert_err
                );
            } else {
                debug!("🧯 Ack compensated: message {} reverted to undelivered", message_id);
            }
            return Err(remove_err);
        }

        // 快取删除失败无碍：条目会随TTL过期 / a failed cache removal is harmless,
        // the entry expires with its TTL
        if let Err(e) = self.msg_cache.remove_cached_message(message_id).await {
            warn!("⚠️  remove_cached_message for {} failed: {}", message_id, e);
        }
        debug!("✅ Message {} acknowledged by {}", message_id, user_id);
        Ok(())
    }
}
