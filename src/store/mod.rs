//! 消息存储 / Message store
//!
//! sled 嵌入式存储：主表加索引树，组合键保证前缀扫描即索引查询
//! Embedded sled storage: primary tree plus index trees; composite keys make
//! prefix scans serve as index lookups

use anyhow::anyhow;
use chrono::Utc;
use sled::{Db, Tree};
use uuid::Uuid;

use crate::domain::Message;
use crate::error::{RelayError, Result};

/// 历史查询单页上限 / History page size cap
pub const HISTORY_LIMIT_MAX: usize = 50;

#[derive(Clone)]
pub struct MessageStore {
    db: Db,
    /// `{message_id}` → Message JSON
    messages: Tree,
    /// `{receiver_id}:{ts:020}:{message_id}` → []
    receiver_idx: Tree,
    /// `{min(a,b)}|{max(a,b)}:{ts:020}:{message_id}` → []
    pair_idx: Tree,
    /// `{receiver_id}:{ts:020}:{message_id}` → []，仅未送达
    /// undelivered rows only
    undelivered_idx: Tree,
    /// `{delivered_at:020}:{message_id}` → []，供保留期清理
    /// for the retention sweep
    delivered_idx: Tree,
}

fn ts_key(ts: i64) -> String {
    format!("{:020}", ts.max(0))
}

fn pair_of(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}|{}", a, b)
    } else {
        format!("{}|{}", b, a)
    }
}

/// 组合键尾部解析：`..:{ts:020}:{message_id}`
/// Parse the tail of a composite key
fn split_key_tail(key: &str) -> Option<(i64, &str)> {
    let mut it = key.rsplitn(3, ':');
    let message_id = it.next()?;
    let ts = it.next()?.parse::<i64>().ok()?;
    Some((ts, message_id))
}

impl MessageStore {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let messages = db.open_tree("messages")?;
        let receiver_idx = db.open_tree("receiver_idx")?;
        let pair_idx = db.open_tree("pair_idx")?;
        let undelivered_idx = db.open_tree("undelivered_idx")?;
        let delivered_idx = db.open_tree("delivered_idx")?;
        Ok(Self {
            db,
            messages,
            receiver_idx,
            pair_idx,
            undelivered_idx,
            delivered_idx,
        })
    }

    /// 创建消息：服务端生成ID，初始未送达 / Create message: server-assigned id,
    /// starts undelivered
    pub fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        timestamp: i64,
    ) -> Result<Message> {
        let msg = Message {
            message_id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            timestamp,
            undelivered: true,
            delivered_at: None,
            read_at: None,
        };
        let row = serde_json::to_vec(&msg)?;
        self.messages.insert(msg.message_id.as_bytes(), row)?;
        self.receiver_idx
            .insert(self.receiver_key(&msg).as_bytes(), b"")?;
        self.pair_idx.insert(self.pair_key(&msg).as_bytes(), b"")?;
        self.undelivered_idx
            .insert(self.receiver_key(&msg).as_bytes(), b"")?;
        self.db.flush()?;
        Ok(msg)
    }

    pub fn find_by_id(&self, message_id: &str) -> Result<Message> {
        match self.messages.get(message_id.as_bytes())? {
            Some(v) => Ok(serde_json::from_slice(&v)?),
            None => Err(RelayError::not_found(message_id)),
        }
    }

    /// 标记已送达；重复标记为空操作 / Mark delivered; repeat marks are no-ops
    pub fn mark_delivered(&self, message_id: &str) -> Result<()> {
        let mut msg = self.find_by_id(message_id)?;
        if !msg.undelivered {
            return Ok(());
        }
        msg.undelivered = false;
        msg.delivered_at = Some(Utc::now().timestamp_millis());
        self.messages
            .insert(message_id.as_bytes(), serde_json::to_vec(&msg)?)?;
        self.undelivered_idx
            .remove(self.receiver_key(&msg).as_bytes())?;
        self.delivered_idx
            .insert(self.delivered_key(&msg)?.as_bytes(), b"")?;
        self.db.flush()?;
        Ok(())
    }

    /// 补偿：回退为未送达并清除送达时间 / Compensator: revert to undelivered and
    /// clear delivered_at
    pub fn mark_undelivered(&self, message_id: &str) -> Result<()> {
        let mut msg = self.find_by_id(message_id)?;
        if msg.undelivered {
            return Ok(());
        }
        if msg.delivered_at.is_some() {
            self.delivered_idx
                .remove(self.delivered_key(&msg)?.as_bytes())?;
        }
        msg.undelivered = true;
        msg.delivered_at = None;
        self.messages
            .insert(message_id.as_bytes(), serde_json::to_vec(&msg)?)?;
        self.undelivered_idx
            .insert(self.receiver_key(&msg).as_bytes(), b"")?;
        self.db.flush()?;
        Ok(())
    }

    /// 补偿删除；行不存在视为已完成 / Compensating delete; a missing row counts
    /// as done
    pub fn delete_by_id(&self, message_id: &str) -> Result<()> {
        let msg = match self.messages.get(message_id.as_bytes())? {
            Some(v) => serde_json::from_slice::<Message>(&v)?,
            None => return Ok(()),
        };
        self.messages.remove(message_id.as_bytes())?;
        self.receiver_idx
            .remove(self.receiver_key(&msg).as_bytes())?;
        self.pair_idx.remove(self.pair_key(&msg).as_bytes())?;
        self.undelivered_idx
            .remove(self.receiver_key(&msg).as_bytes())?;
        if msg.delivered_at.is_some() {
            self.delivered_idx
                .remove(self.delivered_key(&msg)?.as_bytes())?;
        }
        self.db.flush()?;
        Ok(())
    }

    /// 某接收方的未送达消息，按时间升序 / Undelivered messages for a receiver,
    /// timestamp ascending
    pub fn find_undelivered(&self, receiver_id: &str) -> Result<Vec<Message>> {
        let prefix = format!("{}:", receiver_id);
        let mut res = Vec::new();
        for item in self.undelivered_idx.scan_prefix(prefix.as_bytes()) {
            let (k, _) = item?;
            let ks = String::from_utf8(k.to_vec()).unwrap_or_default();
            if let Some((_ts, message_id)) = split_key_tail(&ks) {
                res.push(self.find_by_id(message_id)?);
            }
        }
        Ok(res)
    }

    /// 双方会话历史，时间降序，limit 上限 50，`before_ts` 为开区间上界
    /// Chat history between two users, timestamp descending, limit capped at
    /// 50, `before_ts` is an exclusive upper bound
    pub fn chat_history(
        &self,
        a: &str,
        b: &str,
        before_ts: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let limit = limit.min(HISTORY_LIMIT_MAX);
        let prefix = format!("{}:", pair_of(a, b));
        let mut res = Vec::new();
        for item in self.pair_idx.scan_prefix(prefix.as_bytes()).rev() {
            let (k, _) = item?;
            let ks = String::from_utf8(k.to_vec()).unwrap_or_default();
            let Some((ts, message_id)) = split_key_tail(&ks) else {
                continue;
            };
            if let Some(before) = before_ts {
                if ts >= before {
                    continue;
                }
            }
            res.push(self.find_by_id(message_id)?);
            if res.len() >= limit {
                break;
            }
        }
        Ok(res)
    }

    /// 保留期清理：删除送达时间早于 `days` 天前的已送达消息
    /// Retention sweep: drop delivered messages whose delivered_at is older
    /// than `days` days
    pub fn delete_delivered_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - (days as i64) * 86_400_000;
        let mut ids = Vec::new();
        for item in self.delivered_idx.range(..ts_key(cutoff).into_bytes()) {
            let (k, _) = item?;
            let ks = String::from_utf8(k.to_vec()).unwrap_or_default();
            if let Some((_ts, message_id)) = split_key_tail(&ks) {
                ids.push(message_id.to_string());
            }
        }
        let removed = ids.len();
        for id in ids {
            self.delete_by_id(&id)?;
        }
        Ok(removed)
    }

    fn receiver_key(&self, msg: &Message) -> String {
        format!(
            "{}:{}:{}",
            msg.receiver_id,
            ts_key(msg.timestamp),
            msg.message_id
        )
    }

    fn pair_key(&self, msg: &Message) -> String {
        format!(
            "{}:{}:{}",
            pair_of(&msg.sender_id, &msg.receiver_id),
            ts_key(msg.timestamp),
            msg.message_id
        )
    }

    fn delivered_key(&self, msg: &Message) -> Result<String> {
        let at = msg
            .delivered_at
            .ok_or_else(|| RelayError::Internal(anyhow!("delivered_at missing on delivered row")))?;
        Ok(format!("{}:{}", ts_key(at), msg.message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MessageStore {
        MessageStore::open_temporary().expect("open storage")
    }

    #[test]
    fn create_then_find_roundtrip() {
        let s = store();
        let msg = s.create("u_alice", "u_bob", "hi", 1_700_000_000_000).unwrap();
        let found = s.find_by_id(&msg.message_id).unwrap();
        assert_eq!(found.sender_id, "u_alice");
        assert_eq!(found.receiver_id, "u_bob");
        assert_eq!(found.content, "hi");
        assert_eq!(found.timestamp, 1_700_000_000_000);
        assert!(found.undelivered);
        assert!(found.delivered_at.is_none());
    }

    #[test]
    fn find_missing_is_not_found() {
        let s = store();
        assert!(matches!(
            s.find_by_id("nope"),
            Err(RelayError::MessageNotFound { .. })
        ));
    }

    #[test]
    fn delivered_then_reverted_restores_undelivered() {
        let s = store();
        let msg = s.create("a", "b", "x", 1).unwrap();
        s.mark_delivered(&msg.message_id).unwrap();
        let row = s.find_by_id(&msg.message_id).unwrap();
        assert!(!row.undelivered);
        assert!(row.delivered_at.is_some());
        assert!(s.find_undelivered("b").unwrap().is_empty());

        s.mark_undelivered(&msg.message_id).unwrap();
        let row = s.find_by_id(&msg.message_id).unwrap();
        assert!(row.undelivered);
        assert!(row.delivered_at.is_none());
        assert_eq!(s.find_undelivered("b").unwrap().len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let s = store();
        let msg = s.create("a", "b", "x", 1).unwrap();
        s.delete_by_id(&msg.message_id).unwrap();
        s.delete_by_id(&msg.message_id).unwrap();
        assert!(s.find_by_id(&msg.message_id).is_err());
        assert!(s.find_undelivered("b").unwrap().is_empty());
    }

    #[test]
    fn undelivered_sorted_ascending() {
        let s = store();
        s.create("a", "b", "second", 200).unwrap();
        s.create("a", "b", "first", 100).unwrap();
        s.create("a", "b", "third", 300).unwrap();
        let rows = s.find_undelivered("b").unwrap();
        let contents: Vec<&str> = rows.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn history_descending_with_cursor_and_cap() {
        let s = store();
        for ts in 1..=60_i64 {
            s.create("u_a", "u_b", &format!("m{}", ts), ts).unwrap();
        }
        // 方向无关 / direction-agnostic
        let page = s.chat_history("u_b", "u_a", None, 100).unwrap();
        assert_eq!(page.len(), HISTORY_LIMIT_MAX);
        assert_eq!(page[0].timestamp, 60);
        assert_eq!(page[49].timestamp, 11);

        let older = s.chat_history("u_a", "u_b", Some(11), 50).unwrap();
        assert_eq!(older.len(), 10);
        assert_eq!(older[0].timestamp, 10);
        assert_eq!(older[9].timestamp, 1);
    }

    #[test]
    fn history_only_covers_the_pair() {
        let s = store();
        s.create("u_a", "u_b", "ours", 10).unwrap();
        s.create("u_a", "u_c", "other", 20).unwrap();
        let page = s.chat_history("u_a", "u_b", None, 50).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "ours");
    }

    #[test]
    fn retention_removes_only_old_delivered() {
        let s = store();
        let old = s.create("a", "b", "old", 1).unwrap();
        let fresh = s.create("a", "b", "fresh", 2).unwrap();
        s.mark_delivered(&old.message_id).unwrap();
        // 人为做旧送达时间 / backdate the delivered_at
        let mut row = s.find_by_id(&old.message_id).unwrap();
        s.delivered_idx
            .remove(s.delivered_key(&row).unwrap().as_bytes())
            .unwrap();
        row.delivered_at = Some(Utc::now().timestamp_millis() - 40 * 86_400_000);
        s.messages
            .insert(row.message_id.as_bytes(), serde_json::to_vec(&row).unwrap())
            .unwrap();
        s.delivered_idx
            .insert(s.delivered_key(&row).unwrap().as_bytes(), b"")
            .unwrap();

        let removed = s.delete_delivered_older_than(30).unwrap();
        assert_eq!(removed, 1);
        assert!(s.find_by_id(&old.message_id).is_err());
        assert!(s.find_by_id(&fresh.message_id).is_ok());
    }
}
