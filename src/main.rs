use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use relay_im::cache::memory::MemoryCache;
use relay_im::cache::redis::RedisCache;
use relay_im::cache::{MessageCache, MessageInboxCache, UserConnectionCache};
use relay_im::queue::memory::MemoryQueue;
use relay_im::queue::redis::RedisStreamQueue;
use relay_im::queue::MessageQueue;
use relay_im::{MessageStore, RelayImServer, Settings};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "relay-im chat delivery server", long_about = None)]
struct Args {
    /// 配置文件路径 / Config file path
    #[arg(short = 'c', long = "config", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Arc::new(Settings::load(Some(&args.config))?);
    relay_im::logging::init_tracing(&settings.logging.level)?;
    info!("⚙️  relay-im starting as instance '{}'", settings.server.server_id);

    let store = Arc::new(MessageStore::open(&settings.storage.path)?);

    let (inbox, presence, msg_cache): (
        Arc<dyn MessageInboxCache>,
        Arc<dyn UserConnectionCache>,
        Arc<dyn MessageCache>,
    ) = match settings.cache.backend.as_str() {
        "memory" => {
            info!("🧠 Using in-memory cache backend");
            let cache = Arc::new(MemoryCache::new());
            (cache.clone(), cache.clone(), cache)
        }
        _ => {
            info!("🗄️  Using redis cache backend at {}", settings.cache.url);
            let cache = Arc::new(
                RedisCache::connect(
                    &settings.cache.url,
                    Duration::from_millis(settings.cache.op_timeout_ms),
                )
                .await?,
            );
            (cache.clone(), cache.clone(), cache)
        }
    };

    let queue: Arc<dyn MessageQueue> = match settings.queue.backend.as_str() {
        "memory" => {
            info!("🧠 Using in-memory queue backend");
            Arc::new(MemoryQueue::new(
                settings.queue.max_deliveries,
                Duration::from_millis(settings.queue.block_ms),
            ))
        }
        _ => {
            info!(
                "🗄️  Using redis streams queue '{}' at {}",
                settings.queue.name, settings.queue.url
            );
            Arc::new(
                RedisStreamQueue::connect(
                    &settings.queue.url,
                    &settings.queue.name,
                    &settings.server.server_id,
                    settings.queue.max_deliveries,
                    Duration::from_millis(settings.queue.block_ms),
                    Duration::from_millis(settings.queue.min_idle_ms),
                )
                .await?,
            )
        }
    };

    let server = Arc::new(RelayImServer::new(
        settings.clone(),
        store,
        inbox,
        presence,
        msg_cache,
        queue,
    ));

    // 单消费循环：保持每接收方的入队顺序 / single consumer loop keeps
    // per-receiver enqueue order
    tokio::spawn(relay_im::service::dispatch::run_dispatcher(server.clone()));
    relay_im::tasks::heartbeat::spawn_cleanup_task(server.clone(), settings.server.timeout_ms);
    relay_im::tasks::retention::spawn_retention_task(
        server.clone(),
        settings.retention.days,
        settings.retention.interval_secs,
    );

    let http_server = server.clone();
    let http_host = settings.server.host.clone();
    let http_port = settings.server.http_port;
    let http_fut = async move {
        if let Err(e) = relay_im::api::run_http_server(http_server, &http_host, http_port).await {
            tracing::error!("HTTP server exited: {}", e);
        }
        Ok::<(), anyhow::Error>(())
    };

    let ws_fut = relay_im::ws::server::run_ws_server(
        server,
        &settings.server.host,
        settings.server.ws_port,
    );

    tokio::try_join!(http_fut, ws_fut)?;
    Ok(())
}
