//! 存储抽象
//!
//! 运行记录仓库是状态的唯一事实来源。所有带状态条件的写操作都只在
//! 运行仍处于 queued/running 时生效，以保证终态不可被覆盖。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::TrainerResult;
use crate::models::{
    Metric, ModelVersion, NewMetric, NewModelVersion, Run, RunQuery, RunStatus, ScheduleConfig,
    ScheduleUpdate,
};

/// 训练运行仓库
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create(&self, run: &Run) -> TrainerResult<Run>;

    async fn get_by_id(&self, id: &str) -> TrainerResult<Option<Run>>;

    /// 同时匹配内部ID或别名
    async fn find_by_id_or_alias(&self, key: &str) -> TrainerResult<Option<Run>>;

    async fn alias_exists(&self, run_id: &str) -> TrainerResult<bool>;

    async fn get_status(&self, id: &str) -> TrainerResult<Option<RunStatus>>;

    /// 过滤、排序、分页，返回当前页和总数
    async fn list(&self, query: &RunQuery) -> TrainerResult<(Vec<Run>, i64)>;

    async fn find_active(&self) -> TrainerResult<Vec<Run>>;

    async fn find_completed(&self) -> TrainerResult<Vec<Run>>;

    async fn latest(&self) -> TrainerResult<Option<Run>>;

    async fn count_by_status(&self) -> TrainerResult<HashMap<RunStatus, i64>>;

    /// 在一个事务内把所有活动运行置为 cancelled 并追加说明
    async fn cancel_active(&self, now: DateTime<Utc>, note: &str) -> TrainerResult<Vec<Run>>;

    /// 取消单个活动运行；运行已是终态时返回 false
    async fn cancel(&self, id: &str, now: DateTime<Utc>, note: &str) -> TrainerResult<bool>;

    /// queued -> running；运行已不在 queued 时返回 false
    async fn mark_running(&self, id: &str, log: &str) -> TrainerResult<bool>;

    async fn append_log(&self, id: &str, text: &str) -> TrainerResult<()>;

    /// running -> success/failed；运行已是终态时返回 false
    async fn finish(
        &self,
        id: &str,
        status: RunStatus,
        now: DateTime<Utc>,
        log: &str,
    ) -> TrainerResult<bool>;

    /// 标记失败，但 cancelled 优先且不会被覆盖；返回写入后的状态
    async fn fail_unless_cancelled(
        &self,
        id: &str,
        now: DateTime<Utc>,
        log: &str,
    ) -> TrainerResult<Option<RunStatus>>;

    /// 为已取消的运行重新盖上结束时间与时长
    async fn stamp_cancelled(&self, id: &str, now: DateTime<Utc>, log: &str) -> TrainerResult<()>;
}

/// 模型版本与指标仓库
#[async_trait]
pub trait ModelVersionRepository: Send + Sync {
    /// 单独提交，保证版本ID在指标写入前就已存在
    async fn create_version(&self, version: &NewModelVersion) -> TrainerResult<ModelVersion>;

    /// 在一个事务内批量写入指标，返回写入条数
    async fn add_metrics(
        &self,
        version_id: i64,
        metrics: &[NewMetric],
        timestamp: DateTime<Utc>,
    ) -> TrainerResult<u64>;

    async fn list_versions(&self) -> TrainerResult<Vec<ModelVersion>>;

    async fn get_version(&self, id: i64) -> TrainerResult<Option<ModelVersion>>;

    async fn active_version(&self) -> TrainerResult<Option<ModelVersion>>;

    /// 清除其余版本的激活标记并激活指定版本
    async fn set_active(&self, id: i64) -> TrainerResult<ModelVersion>;

    async fn metrics_for_version(&self, id: i64) -> TrainerResult<Vec<Metric>>;

    async fn delete_version(&self, id: i64) -> TrainerResult<bool>;
}

/// 训练计划仓库
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get(&self) -> TrainerResult<Option<ScheduleConfig>>;

    /// 不存在时创建，存在时逐字段更新
    async fn upsert(&self, update: &ScheduleUpdate, now: DateTime<Utc>)
        -> TrainerResult<ScheduleConfig>;

    async fn set_paused(
        &self,
        paused: bool,
        now: DateTime<Utc>,
    ) -> TrainerResult<Option<ScheduleConfig>>;
}
