use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};

use crate::server::RelayImServer;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_handle)));
}

pub async fn health_handle(server: web::Data<Arc<RelayImServer>>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "server_id": server.server_id(),
        "connections": server.registry.count(),
    }))
}
