use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use trainer_core::TrainerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Trainer(#[from] TrainerError),

    #[error("请求体无效: {0}")]
    Json(#[from] JsonRejection),

    #[error("查询参数无效: {0}")]
    Query(#[from] QueryRejection),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Trainer(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Trainer(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Trainer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Json(_) | ApiError::Query(_) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Trainer(e) => e.code(),
            _ => "VALIDATION_ERROR",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Trainer(TrainerError::Validation(msg)) | ApiError::BadRequest(msg) => {
                msg.clone()
            }
            ApiError::Json(rejection) => rejection.body_text(),
            ApiError::Query(rejection) => rejection.body_text(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "请求处理失败");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
