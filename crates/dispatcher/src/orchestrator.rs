use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use trainer_core::{
    models::{HyperParameterOverrides, HyperParameters, Run, RunPage, RunQuery, TriggerSource},
    traits::{RunRepository, ScheduleRepository},
    TrainerError, TrainerResult,
};
use trainer_worker::{ProcessSupervisor, RunOutcome};

/// 别名冲突时最多尝试的后缀数
pub const MAX_ALIAS_SUFFIX: u32 = 99;

const PREEMPTION_NOTE: &str = "\nRun cancelled: A new run was triggered.\n";
const USER_CANCEL_NOTE: &str = "\nRun cancelled by user request.\n";
const SHUTDOWN_NOTE: &str = "\nRun cancelled: Service is shutting down.\n";

/// 运行日志及其字节长度
#[derive(Debug, Clone, Serialize)]
pub struct RunLogs {
    pub run_id: String,
    pub logs: String,
    pub log_size: usize,
}

/// 训练运行编排器
///
/// 负责准入与抢占：新运行插入前，所有 queued/running 的运行都已提交为 cancelled。
/// 触发请求经由准入锁串行化，保证任意时刻最多一个活动运行。
pub struct RunOrchestrator {
    runs: Arc<dyn RunRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    supervisor: Arc<ProcessSupervisor>,
    defaults: HyperParameters,
    admission: Mutex<()>,
    supervisions: Mutex<Vec<JoinHandle<RunOutcome>>>,
}

impl RunOrchestrator {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        supervisor: Arc<ProcessSupervisor>,
        defaults: HyperParameters,
    ) -> Self {
        Self {
            runs,
            schedules,
            supervisor,
            defaults,
            admission: Mutex::new(()),
            supervisions: Mutex::new(Vec::new()),
        }
    }

    /// 触发新运行，立即返回 queued 状态的记录，训练在后台进行
    ///
    /// 抢占只在数据库中把旧运行标记为 cancelled，新的训练进程随即启动。
    /// 旧进程要到其监督任务读到下一行输出时才会被终止；配置了
    /// `training.cancel_poll_interval_millis` 时，看门狗最迟在一个轮询周期内终止它。
    /// 在此之前可能短暂存在两个训练进程。
    #[instrument(skip(self, overrides), fields(triggered_by = %source))]
    pub async fn trigger(
        &self,
        source: TriggerSource,
        overrides: HyperParameterOverrides,
    ) -> TrainerResult<Run> {
        overrides.validate()?;

        let _admission = self.admission.lock().await;
        let now = Utc::now();

        let preempted = self.runs.cancel_active(now, PREEMPTION_NOTE).await?;
        if !preempted.is_empty() {
            info!(
                "取消 {} 个进行中的运行以启动新运行: {:?}",
                preempted.len(),
                preempted.iter().map(|r| r.run_id.as_str()).collect::<Vec<_>>()
            );
        }

        let params = self.resolve_hyper_parameters(source, &overrides).await?;
        let alias = self.generate_alias(source, now).await?;
        let run = self
            .runs
            .create(&Run::queued(alias, source, params, now))
            .await?;
        info!(run_id = %run.id, alias = %run.run_id, "训练运行已排队");

        let handle = self.supervisor.launch(run.clone());
        self.track(handle).await;

        Ok(run)
    }

    /// 逐字段解析超参数：显式值，计划默认值（仅计划触发），配置默认值
    pub async fn resolve_hyper_parameters(
        &self,
        source: TriggerSource,
        overrides: &HyperParameterOverrides,
    ) -> TrainerResult<HyperParameters> {
        let mut resolved = *overrides;
        if source == TriggerSource::Scheduled {
            if let Some(schedule) = self.schedules.get().await? {
                resolved = resolved.or(&schedule.hyper_parameters);
            }
        }
        Ok(resolved.resolve_with(&self.defaults))
    }

    /// 生成 `{source}__{UTC时间戳}` 别名，冲突时追加 `_1` .. `_99`
    pub async fn generate_alias(
        &self,
        source: TriggerSource,
        now: DateTime<Utc>,
    ) -> TrainerResult<String> {
        let base = format!("{}__{}", source, now.format("%Y-%m-%dT%H:%M:%S"));
        if !self.runs.alias_exists(&base).await? {
            return Ok(base);
        }

        for suffix in 1..=MAX_ALIAS_SUFFIX {
            let candidate = format!("{base}_{suffix}");
            if !self.runs.alias_exists(&candidate).await? {
                debug!("别名冲突，使用后缀: {}", candidate);
                return Ok(candidate);
            }
        }

        Err(TrainerError::IdentifierExhausted {
            base,
            attempts: MAX_ALIAS_SUFFIX + 1,
        })
    }

    /// 直接取消一个活动运行，监督者会在下一个检查点观察到并终止进程
    #[instrument(skip(self))]
    pub async fn cancel(&self, id_or_alias: &str) -> TrainerResult<Run> {
        let run = self.get(id_or_alias).await?;
        if run.is_terminal() {
            return Err(TrainerError::validation(format!(
                "Run {} is already {} and cannot be cancelled",
                run.run_id, run.status
            )));
        }

        if !self.runs.cancel(&run.id, Utc::now(), USER_CANCEL_NOTE).await? {
            // 与进程结束竞争失败，运行已进入终态
            let current = self.get(&run.id).await?;
            return Err(TrainerError::validation(format!(
                "Run {} is already {} and cannot be cancelled",
                current.run_id, current.status
            )));
        }

        info!(run_id = %run.id, alias = %run.run_id, "训练运行已取消");
        self.get(&run.id).await
    }

    pub async fn get(&self, id_or_alias: &str) -> TrainerResult<Run> {
        self.runs
            .find_by_id_or_alias(id_or_alias)
            .await?
            .ok_or_else(|| TrainerError::run_not_found(id_or_alias))
    }

    pub async fn logs(&self, id_or_alias: &str) -> TrainerResult<RunLogs> {
        let run = self.get(id_or_alias).await?;
        Ok(RunLogs {
            log_size: run.log_size(),
            run_id: run.run_id,
            logs: run.logs,
        })
    }

    pub async fn list(&self, query: &RunQuery) -> TrainerResult<RunPage> {
        query.validate()?;
        let (runs, total) = self.runs.list(query).await?;
        Ok(RunPage::new(runs, query, total))
    }

    /// 关闭时取消活动运行并等待监督任务结束
    pub async fn shutdown(&self, wait: Duration) {
        let _admission = self.admission.lock().await;

        match self.runs.cancel_active(Utc::now(), SHUTDOWN_NOTE).await {
            Ok(cancelled) if !cancelled.is_empty() => {
                info!("关闭时取消 {} 个活动运行", cancelled.len());
            }
            Ok(_) => {}
            Err(e) => warn!("关闭时取消活动运行失败: {}", e),
        }

        let handles = std::mem::take(&mut *self.supervisions.lock().await);
        let all = futures::future::join_all(handles);
        if tokio::time::timeout(wait, all).await.is_err() {
            warn!("等待训练进程终止超时 ({:?})", wait);
        }
    }

    async fn track(&self, handle: JoinHandle<RunOutcome>) {
        let mut supervisions = self.supervisions.lock().await;
        supervisions.retain(|h| !h.is_finished());
        supervisions.push(handle);
    }

    /// 当前仍在运行的监督任务数
    pub async fn active_supervisions(&self) -> usize {
        let supervisions = self.supervisions.lock().await;
        supervisions.iter().filter(|h| !h.is_finished()).count()
    }
}
