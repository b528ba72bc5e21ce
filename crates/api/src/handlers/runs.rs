use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use trainer_core::models::{HyperParameterOverrides, RunQuery, RunStatus, SortOrder, TriggerSource};

use crate::{error::ApiResult, routes::AppState};

/// 运行列表查询参数
#[derive(Debug, Deserialize)]
pub struct RunListParams {
    pub status: Option<String>,
    pub triggered_by: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// 仅支持 start_time，其他值按 start_time 处理
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl RunListParams {
    fn into_query(self) -> ApiResult<RunQuery> {
        let defaults = RunQuery::default();
        if let Some(sort) = self.sort.as_deref().filter(|s| *s != "start_time") {
            debug!("不支持的排序字段 {}，按 start_time 排序", sort);
        }
        Ok(RunQuery {
            status: self
                .status
                .as_deref()
                .map(str::parse::<RunStatus>)
                .transpose()?,
            triggered_by: self
                .triggered_by
                .as_deref()
                .map(str::parse::<TriggerSource>)
                .transpose()?,
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
            order: self
                .order
                .as_deref()
                .map(SortOrder::parse_lenient)
                .unwrap_or_default(),
        })
    }
}

/// 触发请求
#[derive(Debug, Deserialize)]
pub struct TriggerRunRequest {
    pub triggered_by: TriggerSource,
    #[serde(flatten)]
    pub hyper_parameters: HyperParameterOverrides,
}

/// 获取运行列表
pub async fn list_runs(
    State(state): State<AppState>,
    params: Result<Query<RunListParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let query = params.into_query()?;
    let page = state.orchestrator.list(&query).await?;

    Ok(Json(json!({
        "data": page.runs,
        "pagination": {
            "page": page.page,
            "limit": page.limit,
            "total": page.total,
            "total_pages": page.total_pages,
        }
    })))
}

/// 按内部ID或别名获取运行
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let run = state.orchestrator.get(&id).await?;
    Ok(Json(run))
}

/// 获取运行日志
pub async fn get_run_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let logs = state.orchestrator.logs(&id).await?;
    Ok(Json(logs))
}

/// 触发新运行，活动运行会被抢占
pub async fn trigger_run(
    State(state): State<AppState>,
    request: Result<Json<TriggerRunRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request?;
    let run = state
        .orchestrator
        .trigger(request.triggered_by, request.hyper_parameters)
        .await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// 取消运行
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let run = state.orchestrator.cancel(&id).await?;
    Ok(Json(run))
}
