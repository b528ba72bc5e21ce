#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use trainer_core::{
    config::TrainingConfig,
    models::{
        HyperParameterOverrides, HyperParameters, Run, RunQuery, RunStatus, ScheduleUpdate,
        TriggerSource,
    },
    traits::{RunRepository, ScheduleRepository},
    TrainerError,
};
use trainer_dispatcher::{RecoveryService, RunOrchestrator, MAX_ALIAS_SUFFIX};
use trainer_infrastructure::DatabaseManager;
use trainer_worker::ProcessSupervisor;

struct Harness {
    _workdir: TempDir,
    runs: Arc<dyn RunRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    orchestrator: Arc<RunOrchestrator>,
}

async fn harness(script: &str) -> Harness {
    let workdir = TempDir::new().unwrap();
    std::fs::write(workdir.path().join("train.sh"), script).unwrap();

    let manager = DatabaseManager::in_memory().await.unwrap();
    manager.migrate().await.unwrap();
    let runs = manager.run_repository();
    let schedules = manager.schedule_repository();

    let config = TrainingConfig {
        interpreter: "sh".to_string(),
        script_path: "train.sh".to_string(),
        working_dir: workdir.path().display().to_string(),
        terminate_grace_seconds: 1,
        kill_grace_seconds: 1,
        ..TrainingConfig::default()
    };
    let supervisor = Arc::new(ProcessSupervisor::new(
        Arc::clone(&runs),
        manager.model_version_repository(),
        config,
    ));
    let orchestrator = Arc::new(RunOrchestrator::new(
        Arc::clone(&runs),
        Arc::clone(&schedules),
        supervisor,
        HyperParameters::default(),
    ));

    Harness {
        _workdir: workdir,
        runs,
        schedules,
        orchestrator,
    }
}

async fn wait_for_status(runs: &Arc<dyn RunRepository>, id: &str, status: RunStatus) -> Run {
    for _ in 0..100 {
        let run = runs.get_by_id(id).await.unwrap().unwrap();
        if run.status == status {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("运行 {id} 未进入状态 {status}");
}

const TICKING_SCRIPT: &str = "while true; do echo tick; sleep 0.1; done\n";

#[tokio::test]
async fn test_new_trigger_preempts_active_run() {
    let h = harness(TICKING_SCRIPT).await;

    let first = h
        .orchestrator
        .trigger(TriggerSource::Manual, HyperParameterOverrides::default())
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Queued);
    assert!(first.run_id.starts_with("manual__"));
    wait_for_status(&h.runs, &first.id, RunStatus::Running).await;

    let second = h
        .orchestrator
        .trigger(TriggerSource::Manual, HyperParameterOverrides::default())
        .await
        .unwrap();

    let preempted = h.runs.get_by_id(&first.id).await.unwrap().unwrap();
    assert_eq!(preempted.status, RunStatus::Cancelled);
    assert!(preempted.end_time.is_some());
    assert!(preempted.duration.is_some());
    assert!(preempted.logs.contains("Run cancelled: A new run was triggered."));

    let active = h.runs.find_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);

    h.orchestrator.shutdown(Duration::from_secs(10)).await;

    assert!(h.runs.find_active().await.unwrap().is_empty());
    let first = h.runs.get_by_id(&first.id).await.unwrap().unwrap();
    assert_eq!(first.status, RunStatus::Cancelled);
    assert!(first
        .logs
        .contains("Training process terminated due to cancellation."));
    let second = h.runs.get_by_id(&second.id).await.unwrap().unwrap();
    assert_eq!(second.status, RunStatus::Cancelled);
    assert!(second.logs.contains("Service is shutting down"));
    assert_eq!(h.orchestrator.active_supervisions().await, 0);
}

#[tokio::test]
async fn test_invalid_overrides_rejected_before_preemption() {
    let h = harness(TICKING_SCRIPT).await;
    let queued = h
        .runs
        .create(&Run::queued(
            "manual__existing".to_string(),
            TriggerSource::Manual,
            HyperParameters::default(),
            Utc::now(),
        ))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .trigger(
            TriggerSource::Manual,
            HyperParameterOverrides {
                rank: Some(0),
                ..HyperParameterOverrides::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let still_queued = h.runs.get_by_id(&queued.id).await.unwrap().unwrap();
    assert_eq!(still_queued.status, RunStatus::Queued);
}

#[tokio::test]
async fn test_alias_collisions_use_suffixes_until_exhausted() {
    let h = harness("exit 0\n").await;
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

    let mut aliases = Vec::new();
    for _ in 0..=MAX_ALIAS_SUFFIX {
        let alias = h
            .orchestrator
            .generate_alias(TriggerSource::Manual, now)
            .await
            .unwrap();
        let mut run = Run::queued(
            alias.clone(),
            TriggerSource::Manual,
            HyperParameters::default(),
            now,
        );
        run.status = RunStatus::Failed;
        h.runs.create(&run).await.unwrap();
        aliases.push(alias);
    }

    assert_eq!(aliases[0], "manual__2024-05-01T08:30:00");
    assert_eq!(aliases[1], "manual__2024-05-01T08:30:00_1");
    assert_eq!(aliases[99], "manual__2024-05-01T08:30:00_99");
    let mut unique = aliases.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), aliases.len());

    let err = h
        .orchestrator
        .generate_alias(TriggerSource::Manual, now)
        .await
        .unwrap_err();
    assert!(matches!(err, TrainerError::IdentifierExhausted { attempts: 100, .. }));

    // 另一个来源不受影响
    let scheduled = h
        .orchestrator
        .generate_alias(TriggerSource::Scheduled, now)
        .await
        .unwrap();
    assert_eq!(scheduled, "scheduled__2024-05-01T08:30:00");
}

#[tokio::test]
async fn test_hyper_parameter_resolution_tiers() {
    let h = harness("exit 0\n").await;
    h.schedules
        .upsert(
            &ScheduleUpdate {
                cron_expression: Some("0 2 * * *".to_string()),
                is_paused: None,
                hyper_parameters: HyperParameterOverrides {
                    rank: Some(20),
                    reg_param: Some(0.1),
                    ..HyperParameterOverrides::default()
                },
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let explicit = HyperParameterOverrides {
        reg_param: Some(0.5),
        ..HyperParameterOverrides::default()
    };

    let scheduled = h
        .orchestrator
        .resolve_hyper_parameters(TriggerSource::Scheduled, &explicit)
        .await
        .unwrap();
    assert_eq!(
        scheduled,
        HyperParameters {
            rank: 20,
            reg_param: 0.5,
            alpha: 1.0,
            max_iter: 10,
        }
    );

    let manual = h
        .orchestrator
        .resolve_hyper_parameters(TriggerSource::Manual, &explicit)
        .await
        .unwrap();
    assert_eq!(manual.rank, 10);
    assert_eq!(manual.reg_param, 0.5);
}

#[tokio::test]
async fn test_cancel_by_alias() {
    let h = harness("exit 0\n").await;
    let run = h
        .runs
        .create(&Run::queued(
            "manual__2024-01-01T00:00:00".to_string(),
            TriggerSource::Manual,
            HyperParameters::default(),
            Utc::now(),
        ))
        .await
        .unwrap();

    let cancelled = h.orchestrator.cancel(&run.run_id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert!(cancelled.end_time.is_some());
    assert!(cancelled.logs.contains("Run cancelled by user request."));

    let err = h.orchestrator.cancel(&run.id).await.unwrap_err();
    assert!(err.is_validation());

    let err = h.orchestrator.cancel("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_and_logs() {
    let h = harness("exit 0\n").await;
    let run = h
        .runs
        .create(&Run::queued(
            "manual__2024-01-01T00:00:00".to_string(),
            TriggerSource::Manual,
            HyperParameters::default(),
            Utc::now(),
        ))
        .await
        .unwrap();
    h.runs.append_log(&run.id, "héllo\n").await.unwrap();

    let page = h
        .orchestrator
        .list(&RunQuery {
            status: Some(RunStatus::Queued),
            ..RunQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.total_pages, 1);

    let err = h
        .orchestrator
        .list(&RunQuery {
            limit: 101,
            ..RunQuery::default()
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let first = h.orchestrator.logs(&run.run_id).await.unwrap();
    let second = h.orchestrator.logs(&run.id).await.unwrap();
    assert_eq!(first.logs, "héllo\n");
    assert_eq!(first.log_size, "héllo\n".len());
    assert_eq!(first.logs, second.logs);

    assert!(h.orchestrator.get("unknown").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_recovery_fails_orphaned_runs() {
    let h = harness("exit 0\n").await;
    let now = Utc::now();

    let queued = h
        .runs
        .create(&Run::queued(
            "manual__a".to_string(),
            TriggerSource::Manual,
            HyperParameters::default(),
            now,
        ))
        .await
        .unwrap();
    let running = h
        .runs
        .create(&Run::queued(
            "manual__b".to_string(),
            TriggerSource::Manual,
            HyperParameters::default(),
            now,
        ))
        .await
        .unwrap();
    h.runs.mark_running(&running.id, "started\n").await.unwrap();

    let report = RecoveryService::new(Arc::clone(&h.runs))
        .recover_interrupted_runs()
        .await
        .unwrap();
    assert_eq!(report.recovered_runs.len(), 2);
    assert!(report.errors.is_empty());

    for id in [&queued.id, &running.id] {
        let run = h.runs.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.end_time.is_some());
        assert!(run.logs.contains("service restarted"));
    }

    let again = RecoveryService::new(Arc::clone(&h.runs))
        .recover_interrupted_runs()
        .await
        .unwrap();
    assert!(again.recovered_runs.is_empty());
}
