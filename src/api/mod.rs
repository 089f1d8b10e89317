pub mod health;
pub mod history;
pub mod message;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing::info;

use crate::server::RelayImServer;

/// 启动HTTP服务 / Start HTTP server
pub async fn run_http_server(server: Arc<RelayImServer>, host: &str, port: u16) -> Result<()> {
    info!("🌐 relay-im HTTP API listening on {}:{}", host, port);
    let data = web::Data::new(server);
    HttpServer::new(move || {
        App::new().app_data(data.clone()).configure(|cfg| {
            history::register(cfg, "/messages/history/{participant_id}");
            message::register(cfg, "/messages/{message_id}");
            health::register(cfg, "/health");
        })
    })
    .bind((host, port))?
    .run()
    .await?;
    Ok(())
}
