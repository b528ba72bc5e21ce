use axum::{extract::State, response::IntoResponse, Json};

use crate::{error::ApiResult, routes::AppState};

pub async fn get_statistics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let statistics = state.statistics.collect(chrono::Utc::now()).await?;
    Ok(Json(statistics))
}
