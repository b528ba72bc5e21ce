use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use trainer_core::{models::RunStatus, traits::RunRepository, TrainerResult};

const RECOVERY_NOTE: &str =
    "\nRun marked as failed: the service restarted before training finished.\n";

/// 启动恢复报告
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// 被标记为失败的运行别名
    pub recovered_runs: Vec<String>,
    pub recovery_duration_ms: u64,
    pub errors: Vec<String>,
}

/// 启动时清理上一个进程遗留的活动运行
///
/// 没有持久化的工作队列，遗留的 queued/running 运行不会再被任何监督者推进。
pub struct RecoveryService {
    runs: Arc<dyn RunRepository>,
}

impl RecoveryService {
    pub fn new(runs: Arc<dyn RunRepository>) -> Self {
        Self { runs }
    }

    pub async fn recover_interrupted_runs(&self) -> TrainerResult<RecoveryReport> {
        let start = Instant::now();
        let orphaned = self.runs.find_active().await?;
        let mut report = RecoveryReport::default();

        if orphaned.is_empty() {
            info!("没有需要恢复的运行");
            return Ok(report);
        }

        warn!("发现 {} 个遗留的活动运行", orphaned.len());
        for run in orphaned {
            match self
                .runs
                .fail_unless_cancelled(&run.id, Utc::now(), RECOVERY_NOTE)
                .await
            {
                Ok(Some(RunStatus::Failed)) => report.recovered_runs.push(run.run_id),
                Ok(status) => {
                    info!(alias = %run.run_id, ?status, "运行已处于终态，跳过恢复");
                }
                Err(e) => {
                    error!(alias = %run.run_id, "恢复运行失败: {}", e);
                    report.errors.push(format!("{}: {e}", run.run_id));
                }
            }
        }

        report.recovery_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "启动恢复完成: 恢复 {} 个运行, 错误 {} 个, 耗时 {}ms",
            report.recovered_runs.len(),
            report.errors.len(),
            report.recovery_duration_ms
        );
        Ok(report)
    }
}
