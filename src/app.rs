use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

use trainer_api::{create_app, AppState};
use trainer_core::AppConfig;
use trainer_dispatcher::{
    ModelVersionService, RecoveryService, RunOrchestrator, ScheduleService, ScheduleTicker,
    StatisticsService,
};
use trainer_infrastructure::DatabaseManager;
use trainer_worker::ProcessSupervisor;

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    orchestrator: Arc<RunOrchestrator>,
    state: AppState,
}

impl Application {
    /// 连接数据库、执行迁移并装配各服务
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
        database.migrate().await.context("数据库迁移失败")?;

        let runs = database.run_repository();
        let versions = database.model_version_repository();
        let schedules = database.schedule_repository();

        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::clone(&runs),
            Arc::clone(&versions),
            config.training.clone(),
        ));
        let orchestrator = Arc::new(RunOrchestrator::new(
            Arc::clone(&runs),
            Arc::clone(&schedules),
            supervisor,
            config.defaults.hyper_parameters(),
        ));

        let state = AppState {
            orchestrator: Arc::clone(&orchestrator),
            statistics: Arc::new(StatisticsService::new(
                Arc::clone(&runs),
                Arc::clone(&schedules),
            )),
            schedule: Arc::new(ScheduleService::new(schedules)),
            model_versions: Arc::new(ModelVersionService::new(versions)),
        };

        Ok(Self {
            config,
            database,
            orchestrator,
            state,
        })
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let report = RecoveryService::new(self.database.run_repository())
            .recover_interrupted_runs()
            .await
            .context("恢复中断的训练运行失败")?;
        if !report.errors.is_empty() {
            warn!("部分运行恢复失败: {:?}", report.errors);
        }

        let ticker_handle = if self.config.schedule.enabled {
            let ticker = ScheduleTicker::new(
                self.database.schedule_repository(),
                Arc::clone(&self.orchestrator),
                Duration::from_secs(self.config.schedule.tick_interval_seconds),
            );
            Some(tokio::spawn(ticker.run(shutdown_rx.resubscribe())))
        } else {
            info!("计划触发器已禁用");
            None
        };

        let served = self.serve(shutdown_rx).await;

        self.orchestrator.shutdown(self.shutdown_wait()).await;
        if let Some(handle) = ticker_handle {
            if let Err(e) = handle.await {
                error!("计划触发器任务异常退出: {e}");
            }
        }
        self.database.close().await;

        served
    }

    async fn serve(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let bind_address = &self.config.api.bind_address;
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("绑定API地址失败: {bind_address}"))?;
        info!("API服务器监听 {bind_address}");

        let app = create_app(self.state.clone(), &self.config.api);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器开始关闭");
            })
            .await
            .context("API服务器运行失败")
    }

    /// 等待活动运行的子进程完成终止升级
    fn shutdown_wait(&self) -> Duration {
        let training = &self.config.training;
        Duration::from_secs(training.terminate_grace_seconds + training.kill_grace_seconds + 5)
    }
}
