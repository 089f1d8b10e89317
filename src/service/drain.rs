//! 重连补投：按插入序回放收件箱 / Reconnect drain: replay the inbox in
//! insertion order

use tracing::{debug, warn};

use crate::domain::event;
use crate::error::Result;
use crate::server::RelayImServer;

impl RelayImServer {
    /// 逐条发出 `incoming_message`，不等待确认；失败条目跳过并留在收件箱，
    /// 等待下次补投
    /// Emits `incoming_message` per entry without awaiting acks; failed
    /// entries are skipped and stay in the inbox for a future drain
    pub async fn drain_inbox(&self, user_id: &str) -> Result<usize> {
        let pending = self.inbox.get_inbox(user_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!("📬 Draining {} pending messages for {}", pending.len(), user_id);

        let mut emitted = 0usize;
        for message_id in &pending {
            // 快路径走消息快取，存储兜底 / cached copy first, store as fallback
            let msg = match self.msg_cache.get_cached_message(message_id).await {
                Ok(Some(msg)) => msg,
                Ok(None) => match self.store.find_by_id(message_id) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("⚠️  Skipping inbox entry {} for {}: {}", message_id, user_id, e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("⚠️  Cache fetch for {} failed, using store: {}", message_id, e);
                    match self.store.find_by_id(message_id) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!("⚠️  Skipping inbox entry {} for {}: {}", message_id, user_id, e);
                            continue;
                        }
                    }
                }
            };
            if self.send_to_user(user_id, &event::incoming_message(&msg)) {
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}
