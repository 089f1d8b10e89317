use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// 统一的服务错误类型 / Unified service error type
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("验证错误 / validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("会话未绑定用户 / session has no bound user")]
    NotAuthenticated,

    #[error("消息不存在 / message not found: {id}")]
    MessageNotFound { id: String },

    #[error("缓存操作失败 / cache operation failed: {op} key={key}: {message}")]
    CacheOperationFailed {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("队列发布失败 / queue publish failed: {0}")]
    QueuePublishFailed(String),

    #[error("队列消费启动失败 / queue consume setup failed: {0}")]
    QueueConsumeFailed(String),

    #[error("存储错误 / storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("内部错误 / internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// 创建验证错误 / Create validation error
    pub fn validation<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建缓存操作错误 / Create cache operation error
    pub fn cache_failed<K: Into<String>, M: ToString>(op: &'static str, key: K, err: M) -> Self {
        Self::CacheOperationFailed {
            op,
            key: key.into(),
            message: err.to_string(),
        }
    }

    pub fn not_found<T: Into<String>>(id: T) -> Self {
        Self::MessageNotFound { id: id.into() }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(anyhow::anyhow!("serialization failed: {}", e))
    }
}

/// 客户端边界的错误映射：内部细节收敛为通用错误
/// Error mapping at the client boundary: internals collapse to a generic error
impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation { .. } => StatusCode::BAD_REQUEST,
            RelayError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            RelayError::MessageNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            RelayError::Validation { field, message } => json!({
                "error": "validation_error",
                "field": field,
                "message": message,
            }),
            RelayError::NotAuthenticated => json!({
                "error": "not_authenticated",
            }),
            RelayError::MessageNotFound { id } => json!({
                "error": "message_not_found",
                "message_id": id,
            }),
            _ => json!({
                "error": "internal_error",
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
