use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::server::RelayImServer;

/// 启动WS监听 / Start WS listener
pub async fn run_ws_server(server: Arc<RelayImServer>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🚀 relay-im WebSocket server listening on {}", addr);
    run_ws_listener(server, listener).await
}

/// 在已绑定的监听器上跑接入循环 / Run the accept loop on a bound listener
pub async fn run_ws_listener(server: Arc<RelayImServer>, listener: TcpListener) -> Result<()> {
    while let Ok((stream, peer_addr)) = listener.accept().await {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::ws::connection::handle_connection(stream, peer_addr, server).await
            {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}
