use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::message::{validate_content, Message, QueueItem};
use crate::error::{RelayError, Result};

/// 双向事件信封 / Bidirectional event envelope
///
/// 进出方向统一为 `{type, data}` 结构
/// Both directions share the `{type, data}` structure
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `send_message` 入站载荷 / Inbound `send_message` payload
#[derive(Deserialize, Debug, Clone)]
pub struct SendMessagePayload {
    pub receiver_id: String,
    pub content: String,
    pub message_id_by_client: i64,
    pub timestamp: i64,
}

/// `message_delivered` 入站载荷 / Inbound `message_delivered` payload
#[derive(Deserialize, Debug, Clone)]
pub struct MessageDeliveredPayload {
    pub message_id: String,
    #[allow(dead_code)]
    #[serde(default)]
    pub timestamp: i64,
}

/// 逐事件显式解码，形状错误归为验证错误
/// Explicit per-event decoders; shape errors map to validation errors
pub fn decode_send_message(data: serde_json::Value) -> Result<SendMessagePayload> {
    let payload: SendMessagePayload = serde_json::from_value(data)
        .map_err(|e| RelayError::validation("send_message", e.to_string()))?;
    if payload.receiver_id.is_empty() {
        return Err(RelayError::validation("receiver_id", "must not be empty"));
    }
    validate_content(&payload.content)?;
    Ok(payload)
}

pub fn decode_message_delivered(data: serde_json::Value) -> Result<MessageDeliveredPayload> {
    let payload: MessageDeliveredPayload = serde_json::from_value(data)
        .map_err(|e| RelayError::validation("message_delivered", e.to_string()))?;
    if payload.message_id.is_empty() {
        return Err(RelayError::validation("message_id", "must not be empty"));
    }
    Ok(payload)
}

/// 发送回执事件 / Send receipt event
pub fn message_received(message_id: &str, message_id_by_client: i64, now_ms: i64) -> WireEnvelope {
    WireEnvelope {
        event_type: "message_received".to_string(),
        data: json!({
            "action": "message_received",
            "message_id": message_id,
            "message_id_by_client": message_id_by_client,
            "timestamp": now_ms,
        }),
    }
}

/// 接收方投递事件 / Incoming delivery event for the receiver
pub fn incoming_message(msg: &Message) -> WireEnvelope {
    WireEnvelope {
        event_type: "incoming_message".to_string(),
        data: json!({
            "type": "incoming_message",
            "message_id": msg.message_id,
            "sender_id": msg.sender_id,
            "content": msg.content,
            "timestamp": msg.timestamp,
        }),
    }
}

/// 由队列载荷构造投递事件 / Delivery event built from a queue item
pub fn incoming_message_from_item(item: &QueueItem, timestamp_ms: i64) -> WireEnvelope {
    WireEnvelope {
        event_type: "incoming_message".to_string(),
        data: json!({
            "type": "incoming_message",
            "message_id": item.message_id,
            "sender_id": item.sender_id,
            "content": item.content,
            "timestamp": timestamp_ms,
        }),
    }
}

pub fn error_event(message: &str) -> WireEnvelope {
    WireEnvelope {
        event_type: "error".to_string(),
        data: json!({ "message": message }),
    }
}

pub fn pong(now_ms: i64) -> WireEnvelope {
    WireEnvelope {
        event_type: "pong".to_string(),
        data: json!({ "timestamp": now_ms }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_send_message_happy_path() {
        let p = decode_send_message(json!({
            "receiver_id": "u_bob",
            "content": "hi",
            "message_id_by_client": 7,
            "timestamp": 1_700_000_000_000_i64,
        }))
        .unwrap();
        assert_eq!(p.receiver_id, "u_bob");
        assert_eq!(p.message_id_by_client, 7);
    }

    #[test]
    fn decode_send_message_rejects_oversized_content() {
        let err = decode_send_message(json!({
            "receiver_id": "u_bob",
            "content": "x".repeat(1001),
            "message_id_by_client": 1,
            "timestamp": 0,
        }))
        .unwrap_err();
        assert!(matches!(err, RelayError::Validation { .. }));
    }

    #[test]
    fn decode_send_message_rejects_missing_fields() {
        let err = decode_send_message(json!({ "content": "hi" })).unwrap_err();
        assert!(matches!(err, RelayError::Validation { .. }));
    }

    #[test]
    fn envelope_shape() {
        let env = message_received("m1", 7, 123);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "message_received");
        assert_eq!(v["data"]["action"], "message_received");
        assert_eq!(v["data"]["message_id_by_client"], 7);
    }
}
