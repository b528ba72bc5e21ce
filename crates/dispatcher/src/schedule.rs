use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use trainer_core::{
    models::{HyperParameterOverrides, Run, ScheduleConfig, ScheduleUpdate, TriggerSource},
    traits::ScheduleRepository,
    TrainerError, TrainerResult,
};

use crate::cron_utils::CronScheduler;
use crate::orchestrator::RunOrchestrator;

/// 训练计划及其派生信息
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScheduleView {
    pub id: i64,
    pub cron_expression: String,
    pub is_paused: bool,
    #[serde(flatten)]
    pub hyper_parameters: HyperParameterOverrides,
    pub description: String,
    /// 暂停时为空
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleView {
    pub fn new(schedule: ScheduleConfig, now: DateTime<Utc>) -> Self {
        let cron = CronScheduler::new(&schedule.cron_expression);
        let description = match &cron {
            Ok(cron) => cron.description(),
            Err(_) => format!("Cron: {}", schedule.cron_expression),
        };
        let next_run = match (&cron, schedule.is_paused) {
            (Ok(cron), false) => cron.next_execution_time(now),
            _ => None,
        };

        Self {
            id: schedule.id,
            cron_expression: schedule.cron_expression,
            is_paused: schedule.is_paused,
            hyper_parameters: schedule.hyper_parameters,
            description,
            next_run,
            created_at: schedule.created_at,
            updated_at: schedule.updated_at,
        }
    }
}

/// 训练计划的读取与维护
pub struct ScheduleService {
    schedules: Arc<dyn ScheduleRepository>,
}

impl ScheduleService {
    pub fn new(schedules: Arc<dyn ScheduleRepository>) -> Self {
        Self { schedules }
    }

    pub async fn get(&self) -> TrainerResult<ScheduleView> {
        let schedule = self
            .schedules
            .get()
            .await?
            .ok_or(TrainerError::ScheduleNotConfigured)?;
        Ok(ScheduleView::new(schedule, Utc::now()))
    }

    /// 更新计划，不存在时创建（此时必须提供 cron_expression）
    pub async fn update(&self, update: &ScheduleUpdate) -> TrainerResult<ScheduleView> {
        if let Some(expr) = &update.cron_expression {
            CronScheduler::validate_cron_expression(expr)?;
        }
        update.hyper_parameters.validate()?;

        let schedule = self.schedules.upsert(update, Utc::now()).await?;
        info!(cron = %schedule.cron_expression, paused = schedule.is_paused, "训练计划已更新");
        Ok(ScheduleView::new(schedule, Utc::now()))
    }

    pub async fn pause(&self) -> TrainerResult<ScheduleView> {
        self.set_paused(true).await
    }

    pub async fn resume(&self) -> TrainerResult<ScheduleView> {
        self.set_paused(false).await
    }

    async fn set_paused(&self, paused: bool) -> TrainerResult<ScheduleView> {
        let schedule = self
            .schedules
            .set_paused(paused, Utc::now())
            .await?
            .ok_or(TrainerError::ScheduleNotConfigured)?;
        info!(paused, "训练计划暂停状态已变更");
        Ok(ScheduleView::new(schedule, Utc::now()))
    }
}

/// 按计划触发训练的后台循环
///
/// 每个周期检查上次检查以来是否经过了触发点；停机期间错过的触发不会补跑。
pub struct ScheduleTicker {
    schedules: Arc<dyn ScheduleRepository>,
    orchestrator: Arc<RunOrchestrator>,
    interval: Duration,
}

impl ScheduleTicker {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        orchestrator: Arc<RunOrchestrator>,
        interval: Duration,
    ) -> Self {
        Self {
            schedules,
            orchestrator,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("计划触发器启动，检查间隔 {:?}", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成
        interval.tick().await;
        let mut last_check = Utc::now();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.tick(last_check, now).await {
                        error!("计划触发检查失败: {}", e);
                    }
                    last_check = now;
                }
                _ = shutdown_rx.recv() => {
                    info!("计划触发器收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 检查 `(since, now]` 内是否需要触发，触发时返回新运行
    pub async fn tick(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TrainerResult<Option<Run>> {
        let Some(schedule) = self.schedules.get().await? else {
            debug!("训练计划未配置");
            return Ok(None);
        };
        if schedule.is_paused {
            debug!("训练计划已暂停");
            return Ok(None);
        }

        let cron = match CronScheduler::new(&schedule.cron_expression) {
            Ok(cron) => cron,
            Err(e) => {
                warn!("计划中的CRON表达式无效，跳过触发: {}", e);
                return Ok(None);
            }
        };

        let Some(fire_time) = cron.fired_between(since, now) else {
            return Ok(None);
        };

        info!(fire_time = %fire_time, "到达计划触发时间，启动训练");
        let run = self
            .orchestrator
            .trigger(TriggerSource::Scheduled, HyperParameterOverrides::default())
            .await?;
        Ok(Some(run))
    }
}
