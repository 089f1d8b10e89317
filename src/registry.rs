use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// 会话句柄 / Session handle
///
/// 一个活跃连接的发送端与元信息；克隆共享同一条通道
/// Sender side and metadata of one live connection; clones share the channel
#[derive(Clone)]
pub struct SessionHandle {
    pub handle_id: String,
    pub addr: SocketAddr,
    pub sender: mpsc::UnboundedSender<WsMessage>,
    pub last_heartbeat: Arc<Mutex<Instant>>,
}

impl SessionHandle {
    pub fn new(handle_id: String, addr: SocketAddr, sender: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self {
            handle_id,
            addr,
            sender,
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<String, SessionHandle>,
    by_handle: HashMap<String, String>,
}

/// 连接注册表 / Connection Registry
///
/// 用户与会话句柄的双向映射，单用户单会话；两张表在同一把锁下保持互逆
/// Bidirectional user ↔ session map, one session per user; both maps stay
/// inverse under a single lock
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定用户到句柄；已有绑定时先双向摘除旧句柄并返回之（不关闭其传输）
    /// Bind user to handle; an existing binding is evicted from both maps and
    /// returned (its transport is not closed here)
    pub fn add(&self, user_id: &str, handle: SessionHandle) -> Option<SessionHandle> {
        let mut inner = self.inner.write();
        let evicted = inner.by_user.remove(user_id);
        if let Some(old) = &evicted {
            inner.by_handle.remove(&old.handle_id);
        }
        inner
            .by_handle
            .insert(handle.handle_id.clone(), user_id.to_string());
        inner.by_user.insert(user_id.to_string(), handle);
        evicted
    }

    /// 幂等移除 / Idempotent removal
    pub fn remove(&self, user_id: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.write();
        let removed = inner.by_user.remove(user_id);
        if let Some(handle) = &removed {
            inner.by_handle.remove(&handle.handle_id);
        }
        removed
    }

    /// 仅当当前绑定仍是指定句柄时移除；断线与顶号竞争时双方互为空操作
    /// Remove only if the given handle is still current; the disconnect and
    /// eviction races are mutual no-ops
    pub fn remove_if_current(&self, user_id: &str, handle_id: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.write();
        match inner.by_user.get(user_id) {
            Some(current) if current.handle_id == handle_id => {
                let removed = inner.by_user.remove(user_id);
                inner.by_handle.remove(handle_id);
                removed
            }
            _ => None,
        }
    }

    pub fn handle_of(&self, user_id: &str) -> Option<SessionHandle> {
        self.inner.read().by_user.get(user_id).cloned()
    }

    pub fn user_of(&self, handle_id: &str) -> Option<String> {
        self.inner.read().by_handle.get(handle_id).cloned()
    }

    pub fn has(&self, user_id: &str) -> bool {
        self.inner.read().by_user.contains_key(user_id)
    }

    pub fn count(&self) -> usize {
        self.inner.read().by_user.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_user.clear();
        inner.by_handle.clear();
    }

    /// 当前绑定快照，供心跳清理等后台任务遍历
    /// Snapshot of current bindings for background sweeps
    pub fn snapshot(&self) -> Vec<(String, SessionHandle)> {
        self.inner
            .read()
            .by_user
            .iter()
            .map(|(u, h)| (u.clone(), h.clone()))
            .collect()
    }
}
