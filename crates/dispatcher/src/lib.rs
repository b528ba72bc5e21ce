//! 训练运行的准入、调度与查询服务

pub mod cron_utils;
pub mod model_versions;
pub mod orchestrator;
pub mod recovery_service;
pub mod schedule;
pub mod statistics;

pub use cron_utils::CronScheduler;
pub use model_versions::{ModelVersionService, VersionMetrics};
pub use orchestrator::{RunLogs, RunOrchestrator, MAX_ALIAS_SUFFIX};
pub use recovery_service::{RecoveryReport, RecoveryService};
pub use schedule::{ScheduleService, ScheduleTicker, ScheduleView};
pub use statistics::{StatisticsService, TrainingStatistics};
