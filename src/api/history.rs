use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::error::RelayError;
use crate::server::RelayImServer;
use crate::store::HISTORY_LIMIT_MAX;

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "lastTimestamp")]
    pub last_timestamp: Option<i64>,
    pub limit: Option<usize>,
}

/// 路由注册入口（GET）/ Route registration (GET)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(history_handle)));
}

/// 历史消息查询，时间降序分页 / Query message history, paged descending by
/// timestamp
pub async fn history_handle(
    server: web::Data<Arc<RelayImServer>>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, RelayError> {
    let participant_id = path.into_inner();
    let limit = query.limit.unwrap_or(HISTORY_LIMIT_MAX);
    let messages = server.store.chat_history(
        &query.user_id,
        &participant_id,
        query.last_timestamp,
        limit,
    )?;
    let count = messages.len();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "messages": messages,
        "count": count,
    })))
}
