use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::HyperParameterOverrides;

/// 训练计划配置（单例）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    pub id: i64,
    pub cron_expression: String,
    pub is_paused: bool,
    /// 计划触发时使用的默认超参数，可逐字段缺省
    pub hyper_parameters: HyperParameterOverrides,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 计划更新请求，None 表示保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub cron_expression: Option<String>,
    pub is_paused: Option<bool>,
    #[serde(flatten)]
    pub hyper_parameters: HyperParameterOverrides,
}
