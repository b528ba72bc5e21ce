use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use trainer_core::{
    models::{Run, RunStatus},
    traits::{RunRepository, ScheduleRepository},
    TrainerResult,
};

use crate::cron_utils::CronScheduler;

/// 训练运行聚合统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrainingStatistics {
    pub total_runs: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub running_count: i64,
    pub queued_count: i64,
    pub cancelled_count: i64,
    /// 百分比，两位小数
    pub success_rate: f64,
    /// 已完成（success/failed）运行的平均时长，分钟，两位小数
    pub average_duration_minutes: Option<f64>,
    pub last_run: Option<Run>,
    pub next_scheduled_run: Option<DateTime<Utc>>,
}

pub struct StatisticsService {
    runs: Arc<dyn RunRepository>,
    schedules: Arc<dyn ScheduleRepository>,
}

impl StatisticsService {
    pub fn new(runs: Arc<dyn RunRepository>, schedules: Arc<dyn ScheduleRepository>) -> Self {
        Self { runs, schedules }
    }

    pub async fn collect(&self, now: DateTime<Utc>) -> TrainerResult<TrainingStatistics> {
        let counts = self.runs.count_by_status().await?;
        let count = |status: RunStatus| counts.get(&status).copied().unwrap_or(0);

        let total_runs: i64 = counts.values().sum();
        let success_count = count(RunStatus::Success);
        let success_rate = if total_runs > 0 {
            round2(success_count as f64 / total_runs as f64 * 100.0)
        } else {
            0.0
        };

        let completed = self.runs.find_completed().await?;
        let average_duration_minutes = average_minutes(&completed).map(round2);

        Ok(TrainingStatistics {
            total_runs,
            success_count,
            failed_count: count(RunStatus::Failed),
            running_count: count(RunStatus::Running),
            queued_count: count(RunStatus::Queued),
            cancelled_count: count(RunStatus::Cancelled),
            success_rate,
            average_duration_minutes,
            last_run: self.runs.latest().await?,
            next_scheduled_run: self.next_scheduled_run(now).await?,
        })
    }

    /// 计划存在且未暂停时的下一次触发时间
    pub async fn next_scheduled_run(&self, now: DateTime<Utc>) -> TrainerResult<Option<DateTime<Utc>>> {
        let Some(schedule) = self.schedules.get().await? else {
            return Ok(None);
        };
        if schedule.is_paused {
            return Ok(None);
        }

        match CronScheduler::new(&schedule.cron_expression) {
            Ok(cron) => Ok(cron.next_execution_time(now)),
            Err(e) => {
                warn!("计划中的CRON表达式无效: {}", e);
                Ok(None)
            }
        }
    }
}

fn average_minutes(runs: &[Run]) -> Option<f64> {
    let durations: Vec<f64> = runs.iter().filter_map(Run::duration_minutes).collect();
    if durations.is_empty() {
        return None;
    }
    Some(durations.iter().sum::<f64>() / durations.len() as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use trainer_core::models::{HyperParameters, TriggerSource};

    fn finished(minutes: i64) -> Run {
        let start = Utc::now();
        let mut run = Run::queued(
            format!("manual__{minutes}"),
            TriggerSource::Manual,
            HyperParameters::default(),
            start,
        );
        run.status = RunStatus::Success;
        run.end_time = Some(start + Duration::minutes(minutes));
        run
    }

    #[test]
    fn test_average_minutes() {
        assert_eq!(average_minutes(&[]), None);
        assert_eq!(average_minutes(&[finished(10), finished(20)]), Some(15.0));
        assert_eq!(average_minutes(&[finished(0)]), Some(0.0));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(0.0), 0.0);
    }
}
