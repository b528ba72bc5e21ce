use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

use trainer_dispatcher::{ModelVersionService, RunOrchestrator, ScheduleService, StatisticsService};

use crate::handlers::{
    health::health_check,
    model_versions::{
        delete_model_version, get_active_model_version, get_model_metrics, list_model_versions,
        set_active_model_version,
    },
    runs::{cancel_run, get_run, get_run_logs, list_runs, trigger_run},
    schedule::{get_schedule, pause_schedule, resume_schedule, update_schedule},
    statistics::get_statistics,
};

/// 所有接口挂载的路径前缀
pub const API_PREFIX: &str = "/api/v1/model-training";

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RunOrchestrator>,
    pub statistics: Arc<StatisticsService>,
    pub schedule: Arc<ScheduleService>,
    pub model_versions: Arc<ModelVersionService>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    let training = Router::new()
        // 训练运行
        .route("/runs", get(list_runs))
        .route("/runs/trigger", post(trigger_run))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/logs", get(get_run_logs))
        .route("/runs/{id}/cancel", post(cancel_run))
        .route("/statistics", get(get_statistics))
        // 训练计划
        .route("/schedule", get(get_schedule).put(update_schedule))
        .route("/schedule/pause", patch(pause_schedule))
        .route("/schedule/resume", patch(resume_schedule))
        // 模型版本
        .route("/model-versions", get(list_model_versions))
        .route(
            "/model-versions/active",
            get(get_active_model_version).post(set_active_model_version),
        )
        .route("/model-versions/{id}", delete(delete_model_version))
        .route("/metrics", get(get_model_metrics));

    Router::new()
        .route("/health", get(health_check))
        .nest(API_PREFIX, training)
        .with_state(state)
}
