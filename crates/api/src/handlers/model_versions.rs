use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use trainer_core::models::ModelVersion;

use crate::{error::ApiResult, routes::AppState};

/// 设置激活版本请求
#[derive(Debug, Deserialize)]
pub struct SetActiveVersionRequest {
    pub model_version_id: i64,
}

/// 激活版本响应
#[derive(Debug, Serialize)]
pub struct ActiveVersionResponse {
    pub active_version: Option<ModelVersion>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    pub version_id: i64,
}

/// 获取全部模型版本，最新的在前
pub async fn list_model_versions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.model_versions.list().await?))
}

pub async fn get_active_model_version(
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let response = match state.model_versions.active().await? {
        Some(version) => ActiveVersionResponse {
            message: format!("Active version: {}", version.version_tag),
            active_version: Some(version),
        },
        None => ActiveVersionResponse {
            active_version: None,
            message: "No active model version configured".to_string(),
        },
    };
    Ok(Json(response))
}

pub async fn set_active_model_version(
    State(state): State<AppState>,
    request: Result<Json<SetActiveVersionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request?;
    let version = state.model_versions.activate(request.model_version_id).await?;
    Ok(Json(ActiveVersionResponse {
        message: format!(
            "Successfully set active version to: {}",
            version.version_tag
        ),
        active_version: Some(version),
    }))
}

/// 删除版本及其指标
pub async fn delete_model_version(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.model_versions.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 获取某个版本的全部指标，最新的在前
pub async fn get_model_metrics(
    State(state): State<AppState>,
    params: Result<Query<MetricsParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    Ok(Json(state.model_versions.metrics(params.version_id).await?))
}
