use std::sync::Arc;

use tokio::time::{interval, Duration};

use crate::server::RelayImServer;

/// 超时检测的最大误差占静默阈值的比例分母 / Divisor bounding detection lag
/// relative to the silence threshold
const SWEEP_FRACTION: u64 = 4;
/// 扫描周期下限，避免小阈值下的空转 / Sweep floor, avoids spinning on tiny
/// thresholds
const SWEEP_FLOOR_MS: u64 = 100;

/// 启动心跳清理任务 / Spawn heartbeat cleanup task
///
/// 静默超过阈值的会话收到关闭帧并被摘除；静默崩溃的连接不再占用绑定
/// Sessions silent past the threshold get a close frame and are unbound;
/// silently-crashed connections no longer hold their binding
pub fn spawn_cleanup_task(server: Arc<RelayImServer>, timeout_ms: u64) {
    tokio::spawn(async move {
        // 扫描周期取阈值的固定分数，检测误差随配置同步伸缩
        // Sweep at a fixed fraction of the threshold, so detection lag scales
        // with the configured timeout
        let sweep_ms = (timeout_ms / SWEEP_FRACTION).max(SWEEP_FLOOR_MS);
        tracing::info!("⏰ Heartbeat sweep every {}ms for timeout {}ms", sweep_ms, timeout_ms);
        let mut sweep_interval = interval(Duration::from_millis(sweep_ms));
        loop {
            sweep_interval.tick().await;
            sweep_stale_sessions(&server, timeout_ms).await;
        }
    });
}

async fn sweep_stale_sessions(server: &RelayImServer, timeout_ms: u64) {
    for (user_id, handle) in server.registry.snapshot() {
        let silent_ms = handle.last_heartbeat.lock().elapsed().as_millis();
        if silent_ms <= timeout_ms as u128 {
            continue;
        }
        tracing::info!("🧹 Closing stale session {} of {}", handle.handle_id, user_id);
        server.send_close(&handle, "Connection timeout");
        if server
            .registry
            .remove_if_current(&user_id, &handle.handle_id)
            .is_some()
        {
            if let Err(e) = server.presence.remove_user_connection(&user_id).await {
                tracing::warn!("⚠️  Presence removal for {} failed: {}", user_id, e);
            }
        }
    }
}
