use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// 消息内容长度上限（Unicode标量值）/ Max content length in Unicode scalar values
pub const MAX_CONTENT_CHARS: usize = 1000;

/// 消息记录 / Message Record
///
/// 持久化的核心实体；`undelivered` 在接收方确认前始终为 true
/// The persisted core entity; `undelivered` stays true until the receiver acks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// 发送方提供的毫秒时间戳，原样保留，作为排序键
    /// Sender-supplied epoch millis, retained verbatim, used as sort key
    pub timestamp: i64,
    pub undelivered: bool,
    pub delivered_at: Option<i64>,
    /// 预留字段 / Reserved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
}

/// 队列载荷 / Queue item payload
///
/// 跨队列的线上格式：camelCase 键，ISO-8601 时间戳
/// On-wire shape crossing the queue: camelCase keys, ISO-8601 timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub timestamp: String,
}

impl QueueItem {
    pub fn from_message(msg: &Message) -> Self {
        let ts = DateTime::<Utc>::from_timestamp_millis(msg.timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            .to_rfc3339();
        Self {
            message_id: msg.message_id.clone(),
            sender_id: msg.sender_id.clone(),
            receiver_id: msg.receiver_id.clone(),
            content: msg.content.clone(),
            timestamp: ts,
        }
    }

    /// 解析回毫秒时间戳 / Parse back to epoch millis
    pub fn timestamp_millis(&self) -> Result<i64> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|d| d.timestamp_millis())
            .map_err(|e| RelayError::validation("timestamp", format!("not ISO-8601: {}", e)))
    }
}

/// 内容校验：1..=1000 个字符 / Content bounds check: 1..=1000 chars
pub fn validate_content(content: &str) -> Result<()> {
    let len = content.chars().count();
    if len == 0 {
        return Err(RelayError::validation("content", "must not be empty"));
    }
    if len > MAX_CONTENT_CHARS {
        return Err(RelayError::validation(
            "content",
            format!("length {} exceeds {}", len, MAX_CONTENT_CHARS),
        ));
    }
    Ok(())
}
