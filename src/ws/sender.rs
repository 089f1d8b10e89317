use anyhow::Result;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::domain::WireEnvelope;
use crate::registry::SessionHandle;
use crate::server::RelayImServer;

impl RelayImServer {
    /// 向用户的本地会话发事件；无本地会话或传输入队失败返回 false
    /// Emit an event to the user's local session; false when there is no
    /// local session or the transport enqueue fails
    pub fn send_to_user(&self, user_id: &str, event: &WireEnvelope) -> bool {
        let Some(handle) = self.registry.handle_of(user_id) else {
            debug!("📭 No local session for {}", user_id);
            return false;
        };
        let Ok(text) = serde_json::to_string(event) else {
            warn!("⚠️  Failed to serialize event for {}", user_id);
            return false;
        };
        match handle.sender.send(Message::Text(text)) {
            Ok(()) => {
                debug!("📤 Sent {} to {}", event.event_type, user_id);
                true
            }
            Err(_) => {
                warn!("⚠️  Transport gone for {}", user_id);
                false
            }
        }
    }

    /// 向指定句柄发事件 / Emit an event on a specific handle
    pub fn send_to_handle(&self, handle: &SessionHandle, event: &WireEnvelope) -> Result<()> {
        let text = serde_json::to_string(event)?;
        handle
            .sender
            .send(Message::Text(text))
            .map_err(|e| anyhow::anyhow!("failed to send event: {}", e))
    }

    /// 发送关闭帧 / Send a close frame
    pub fn send_close(&self, handle: &SessionHandle, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: std::borrow::Cow::Borrowed(reason),
        };
        if handle.sender.send(Message::Close(Some(frame))).is_err() {
            debug!("🔒 Close for {} raced its disconnect", handle.handle_id);
        }
    }
}
