use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::error::RelayError;
use crate::server::RelayImServer;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(message_handle)));
}

/// 单条消息查询，缺失映射404 / Single message lookup, misses map to 404
pub async fn message_handle(
    server: web::Data<Arc<RelayImServer>>,
    path: web::Path<String>,
) -> Result<HttpResponse, RelayError> {
    let message_id = path.into_inner();
    let message = server.store.find_by_id(&message_id)?;
    Ok(HttpResponse::Ok().json(message))
}
