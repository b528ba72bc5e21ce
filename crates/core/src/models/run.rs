use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::duration::format_duration;
use crate::errors::{TrainerError, TrainerResult};

/// 一次模型重训练的尝试
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    /// 内部不透明ID (UUID)
    pub id: String,
    /// 可读别名: `{trigger_source}__{UTC时间戳}`，全局唯一
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub triggered_by: TriggerSource,
    pub logs: String,
    pub hyper_parameters: Option<HyperParameters>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// 创建一个排队中的运行记录
    pub fn queued(
        run_id: String,
        triggered_by: TriggerSource,
        hyper_parameters: HyperParameters,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id,
            status: RunStatus::Queued,
            start_time: now,
            end_time: None,
            duration: None,
            triggered_by,
            logs: String::new(),
            hyper_parameters: Some(hyper_parameters),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 日志字节长度
    pub fn log_size(&self) -> usize {
        self.logs.len()
    }

    /// 根据开始与结束时间重新计算时长字符串
    pub fn computed_duration(&self) -> Option<String> {
        self.end_time
            .map(|end| format_duration(end - self.start_time))
    }

    /// 已完成运行的时长（分钟）
    pub fn duration_minutes(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 60_000.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 5] = [
        RunStatus::Queued,
        RunStatus::Running,
        RunStatus::Success,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// queued 或 running
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// 状态机允许的迁移，终态不可再迁移
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Queued, RunStatus::Running) => true,
            (RunStatus::Queued, RunStatus::Cancelled) => true,
            (RunStatus::Queued, RunStatus::Failed) => true,
            (RunStatus::Running, RunStatus::Success) => true,
            (RunStatus::Running, RunStatus::Failed) => true,
            (RunStatus::Running, RunStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = TrainerError;

    fn from_str(s: &str) -> TrainerResult<Self> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(TrainerError::validation(format!(
                "Invalid status value. Must be one of: queued, running, success, failed, cancelled (got '{s}')"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for RunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<RunStatus>()
            .map_err(|_| format!("Invalid run status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 触发来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Scheduled,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = TrainerError;

    fn from_str(s: &str) -> TrainerResult<Self> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "scheduled" => Ok(TriggerSource::Scheduled),
            _ => Err(TrainerError::validation(format!(
                "Invalid triggered_by value. Must be one of: manual, scheduled (got '{s}')"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TriggerSource {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TriggerSource {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<TriggerSource>()
            .map_err(|_| format!("Invalid trigger source: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TriggerSource {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 训练超参数，四个字段要么同时存在要么同时缺失
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HyperParameters {
    /// 隐因子数量
    pub rank: i64,
    /// 正则化强度
    #[serde(rename = "regParam")]
    pub reg_param: f64,
    /// 置信度放大系数
    pub alpha: f64,
    /// 最大迭代次数
    #[serde(rename = "maxIter")]
    pub max_iter: i64,
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self {
            rank: 10,
            reg_param: 0.01,
            alpha: 1.0,
            max_iter: 10,
        }
    }
}

impl HyperParameters {
    /// 从数据库的四个可空列组装，部分缺失视为整体缺失
    pub fn from_columns(
        rank: Option<i64>,
        reg_param: Option<f64>,
        alpha: Option<f64>,
        max_iter: Option<i64>,
    ) -> Option<Self> {
        match (rank, reg_param, alpha, max_iter) {
            (Some(rank), Some(reg_param), Some(alpha), Some(max_iter)) => Some(Self {
                rank,
                reg_param,
                alpha,
                max_iter,
            }),
            _ => None,
        }
    }

    pub fn validate(&self) -> TrainerResult<()> {
        HyperParameterOverrides::from(*self).validate()
    }
}

/// 部分指定的超参数（请求体或计划默认值）
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct HyperParameterOverrides {
    pub rank: Option<i64>,
    #[serde(rename = "regParam")]
    pub reg_param: Option<f64>,
    pub alpha: Option<f64>,
    #[serde(rename = "maxIter")]
    pub max_iter: Option<i64>,
}

impl HyperParameterOverrides {
    pub fn is_empty(&self) -> bool {
        self.rank.is_none()
            && self.reg_param.is_none()
            && self.alpha.is_none()
            && self.max_iter.is_none()
    }

    /// 逐字段解析：显式值优先，其次 fallback
    pub fn or(&self, fallback: &HyperParameterOverrides) -> HyperParameterOverrides {
        HyperParameterOverrides {
            rank: self.rank.or(fallback.rank),
            reg_param: self.reg_param.or(fallback.reg_param),
            alpha: self.alpha.or(fallback.alpha),
            max_iter: self.max_iter.or(fallback.max_iter),
        }
    }

    /// 用硬编码默认值补齐缺失字段
    pub fn resolve_with(&self, defaults: &HyperParameters) -> HyperParameters {
        HyperParameters {
            rank: self.rank.unwrap_or(defaults.rank),
            reg_param: self.reg_param.unwrap_or(defaults.reg_param),
            alpha: self.alpha.unwrap_or(defaults.alpha),
            max_iter: self.max_iter.unwrap_or(defaults.max_iter),
        }
    }

    pub fn validate(&self) -> TrainerResult<()> {
        if let Some(rank) = self.rank {
            if rank <= 0 {
                return Err(TrainerError::validation("rank must be a positive integer"));
            }
        }
        if let Some(max_iter) = self.max_iter {
            if max_iter <= 0 {
                return Err(TrainerError::validation("maxIter must be a positive integer"));
            }
        }
        if let Some(reg_param) = self.reg_param {
            if !reg_param.is_finite() || reg_param < 0.0 {
                return Err(TrainerError::validation(
                    "regParam must be a non-negative number",
                ));
            }
        }
        if let Some(alpha) = self.alpha {
            if !alpha.is_finite() || alpha < 0.0 {
                return Err(TrainerError::validation("alpha must be a non-negative number"));
            }
        }
        Ok(())
    }
}

impl From<HyperParameters> for HyperParameterOverrides {
    fn from(params: HyperParameters) -> Self {
        Self {
            rank: Some(params.rank),
            reg_param: Some(params.reg_param),
            alpha: Some(params.alpha),
            max_iter: Some(params.max_iter),
        }
    }
}

/// 运行列表的排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// 大小写不敏感，非 ASC 一律视为 DESC
    pub fn parse_lenient(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }
}

/// 运行列表查询
#[derive(Debug, Clone)]
pub struct RunQuery {
    pub status: Option<RunStatus>,
    pub triggered_by: Option<TriggerSource>,
    pub page: u32,
    pub limit: u32,
    pub order: SortOrder,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            status: None,
            triggered_by: None,
            page: 1,
            limit: 50,
            order: SortOrder::Desc,
        }
    }
}

impl RunQuery {
    pub const MAX_LIMIT: u32 = 100;

    pub fn validate(&self) -> TrainerResult<()> {
        if self.page < 1 {
            return Err(TrainerError::validation("page must be >= 1"));
        }
        if self.limit < 1 || self.limit > Self::MAX_LIMIT {
            return Err(TrainerError::validation("limit must be between 1 and 100"));
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.limit as i64
    }
}

/// 一页运行记录
#[derive(Debug, Clone, Serialize)]
pub struct RunPage {
    pub runs: Vec<Run>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl RunPage {
    pub fn new(runs: Vec<Run>, query: &RunQuery, total: i64) -> Self {
        let limit = query.limit.max(1) as i64;
        let total_pages = if total > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            runs,
            page: query.page,
            limit: query.limit,
            total,
            total_pages,
        }
    }
}
