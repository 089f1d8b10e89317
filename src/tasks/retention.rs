use std::sync::Arc;

use tokio::time::{interval, Duration};

use crate::server::RelayImServer;

/// 启动保留期清理任务 / Spawn retention sweep task
///
/// 只清已送达且过保留期的行；未送达的行永不触碰
/// Only delivered rows past the horizon are dropped; undelivered rows are
/// never touched
pub fn spawn_retention_task(server: Arc<RelayImServer>, days: u64, interval_secs: u64) {
    tokio::spawn(async move {
        tracing::info!("⏰ Retention sweep every {}s, horizon {} days", interval_secs, days);
        let mut sweep_interval = interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            sweep_interval.tick().await;
            match server.store.delete_delivered_older_than(days) {
                Ok(0) => {}
                Ok(n) => tracing::info!("🧹 Retention sweep removed {} delivered messages", n),
                Err(e) => tracing::warn!("⚠️  Retention sweep failed: {}", e),
            }
        }
    });
}
