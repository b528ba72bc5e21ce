use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};

use trainer_core::models::ScheduleUpdate;

use crate::{error::ApiResult, routes::AppState};

pub async fn get_schedule(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.schedule.get().await?))
}

/// 更新训练计划，不存在时创建
pub async fn update_schedule(
    State(state): State<AppState>,
    request: Result<Json<ScheduleUpdate>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(update) = request?;
    Ok(Json(state.schedule.update(&update).await?))
}

pub async fn pause_schedule(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.schedule.pause().await?))
}

pub async fn resume_schedule(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.schedule.resume().await?))
}
