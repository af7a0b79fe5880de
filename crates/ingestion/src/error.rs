//! Ingestion 错误类型

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use contracts::HandoffError;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 请求体缺字段、字段为空或不是合法 JSON 对象
    #[error("invalid payload: {detail}")]
    InvalidPayload {
        /// 人类可读的原因
        detail: String,
    },

    /// Dispatcher 拒绝接收
    #[error("handoff refused: {0}")]
    Handoff(#[from] HandoffError),
}

impl IngestionError {
    pub fn invalid_payload(detail: impl Into<String>) -> Self {
        Self::InvalidPayload {
            detail: detail.into(),
        }
    }

    /// 对外暴露的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "InvalidPayload",
            Self::Handoff(e) => e.kind(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Self::Handoff(HandoffError::CircuitOpen | HandoffError::ShuttingDown) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Handoff(HandoffError::InvalidEnvelope) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestionError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::InvalidPayload { detail } => json!({ "error": self.kind(), "detail": detail }),
            Self::Handoff(_) => json!({ "error": self.kind() }),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
