//! # Trainer API
//!
//! 模型重训练编排服务的 REST 接口，基于 Axum。
//!
//! ## API 端点
//!
//! 均挂载在 `/api/v1/model-training` 下：
//!
//! ### 训练运行
//! - `GET /runs` - 运行列表（status、triggered_by、page、limit、sort、order）
//! - `POST /runs/trigger` - 触发新运行，抢占当前活动运行
//! - `GET /runs/{id}` - 按内部ID或别名获取运行
//! - `GET /runs/{id}/logs` - 运行日志
//! - `POST /runs/{id}/cancel` - 取消运行
//! - `GET /statistics` - 聚合统计
//!
//! ### 训练计划
//! - `GET /schedule`、`PUT /schedule`
//! - `PATCH /schedule/pause`、`PATCH /schedule/resume`
//!
//! ### 模型版本
//! - `GET /model-versions`
//! - `GET /model-versions/active`、`POST /model-versions/active`
//! - `DELETE /model-versions/{id}`
//! - `GET /metrics?version_id=`
//!
//! 另有 `GET /health`。
//!
//! ## 错误响应
//!
//! ```json
//! { "error": { "code": "VALIDATION_ERROR", "message": "limit must be between 1 and 100" } }
//! ```
//!
//! 校验错误返回 400，资源不存在返回 404，其余返回 500。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use trainer_core::config::ApiConfig;

use middleware::{cors_layer, trace_layer};
pub use routes::{create_routes, AppState, API_PREFIX};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(ServiceBuilder::new().layer(trace_layer()));

    if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
