use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use trainer_core::{
    config::TrainingConfig,
    models::{HyperParameters, ModelVersion, Run, RunStatus},
    traits::{ModelVersionRepository, RunRepository},
    TrainerError, TrainerResult,
};

use crate::metric_parser::MetricParser;
use crate::publisher::{format_hyper_parameters, VersionPublisher};
use crate::termination::{escalate, EscalationPolicy, TerminationOutcome};

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// 一次监督的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded { version: Option<ModelVersion> },
    Failed { exit_code: Option<i32> },
    Cancelled,
    /// 启动前运行已不在 queued 状态，未启动进程
    Skipped,
}

/// 版本标签，UTC 精确到秒
pub fn version_tag(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// 训练进程的调用参数
#[derive(Debug, Clone)]
pub struct TrainingCommand {
    pub program: String,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl TrainingCommand {
    pub fn new(config: &TrainingConfig, params: &HyperParameters, version_tag: &str) -> Self {
        let working_dir = PathBuf::from(&config.working_dir);
        let script = working_dir.join(&config.script_path);

        let args = vec![
            script.display().to_string(),
            "--rank".to_string(),
            params.rank.to_string(),
            "--regParam".to_string(),
            params.reg_param.to_string(),
            "--alpha".to_string(),
            params.alpha.to_string(),
            "--maxIter".to_string(),
            params.max_iter.to_string(),
            "--versionTag".to_string(),
            version_tag.to_string(),
        ];

        Self {
            program: config.interpreter.clone(),
            script,
            args,
            working_dir,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 启动进程，stdout 与 stderr 合并到同一个行通道
    fn spawn(&self) -> TrainerResult<ChildSession> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TrainerError::Launch(format!("启动训练进程失败 {}: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainerError::Launch("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TrainerError::Launch("无法获取stderr".to_string()))?;

        let (tx, lines) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let readers = vec![spawn_reader(stdout, tx.clone()), spawn_reader(stderr, tx)];

        Ok(ChildSession {
            child,
            lines,
            readers,
        })
    }
}

/// 按行读取输出，非 UTF-8 字节被替换
fn spawn_reader<R>(reader: R, tx: mpsc::Sender<io::Result<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(|c| c == '\n' || c == '\r')
                        .to_string();
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    })
}

/// 运行中的子进程及其输出通道；drop 时结束读取任务并杀死进程
struct ChildSession {
    child: Child,
    lines: mpsc::Receiver<io::Result<String>>,
    readers: Vec<JoinHandle<()>>,
}

impl Drop for ChildSession {
    fn drop(&mut self) {
        self.lines.close();
        for reader in &self.readers {
            reader.abort();
        }
    }
}

enum StreamEnd {
    Eof,
    Cancelled,
}

/// 训练进程监督者，同一时刻只负责一个外部进程
pub struct ProcessSupervisor {
    runs: Arc<dyn RunRepository>,
    publisher: VersionPublisher,
    config: TrainingConfig,
}

impl ProcessSupervisor {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        versions: Arc<dyn ModelVersionRepository>,
        config: TrainingConfig,
    ) -> Self {
        let publisher = VersionPublisher::new(versions, Arc::clone(&runs), &config);
        Self {
            runs,
            publisher,
            config,
        }
    }

    pub fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            terminate_grace: Duration::from_secs(self.config.terminate_grace_seconds),
            kill_grace: Duration::from_secs(self.config.kill_grace_seconds),
        }
    }

    /// 在后台监督一次运行；监督任务本身崩溃时运行被标记为失败
    pub fn launch(self: &Arc<Self>, run: Run) -> JoinHandle<RunOutcome> {
        let supervisor = Arc::clone(self);
        let run_id = run.id.clone();

        tokio::spawn(async move {
            let inner = {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move { supervisor.supervise(run).await })
            };

            match inner.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let err = TrainerError::Internal(format!("监督任务异常退出: {join_error}"));
                    supervisor.record_fatal(&run_id, &err).await
                }
            }
        })
    }

    /// 驱动一次运行直到终态
    #[instrument(skip(self, run), fields(run_id = %run.id, alias = %run.run_id))]
    pub async fn supervise(&self, run: Run) -> RunOutcome {
        match self.execute(&run).await {
            Ok(outcome) => {
                info!(?outcome, "训练运行结束");
                outcome
            }
            Err(e) => self.record_fatal(&run.id, &e).await,
        }
    }

    async fn execute(&self, run: &Run) -> TrainerResult<RunOutcome> {
        let run_id = run.id.as_str();

        match self.runs.get_status(run_id).await? {
            Some(RunStatus::Queued) => {}
            Some(status) => {
                info!(%status, "运行在启动前已不在排队状态，跳过");
                return Ok(RunOutcome::Skipped);
            }
            None => {
                warn!("运行记录不存在，跳过");
                return Ok(RunOutcome::Skipped);
            }
        }

        let params = run.hyper_parameters.unwrap_or_default();
        let header = format!("Training started...\n{}\n", format_hyper_parameters(&params));
        if !self.runs.mark_running(run_id, &header).await? {
            info!("运行在启动前被取消");
            return Ok(RunOutcome::Skipped);
        }

        let tag = version_tag(Utc::now());
        let command = TrainingCommand::new(&self.config, &params, &tag);
        if !command.script.exists() {
            return Err(TrainerError::Launch(format!(
                "Training script not found at: {}",
                command.script.display()
            )));
        }

        let rule = "=".repeat(60);
        self.runs
            .append_log(
                run_id,
                &format!("\n{rule}\nExecuting command:\n{}\n{rule}\n", command.command_line()),
            )
            .await?;

        if self.is_cancelled(run_id).await? {
            info!("运行在进程启动前被取消");
            return Ok(RunOutcome::Cancelled);
        }

        let mut session = command.spawn()?;
        info!(pid = ?session.child.id(), version_tag = %tag, "训练进程已启动");

        let mut parser = MetricParser::new();
        let end = match self.pump(run_id, &mut session, &mut parser).await {
            Ok(end) => end,
            Err(e) => return Ok(self.abort_with_error(run_id, session, e).await),
        };
        // 输出结束时再检查一次取消
        let end = match end {
            StreamEnd::Eof if self.is_cancelled(run_id).await? => StreamEnd::Cancelled,
            other => other,
        };

        if let StreamEnd::Cancelled = end {
            return Ok(self.handle_cancellation(run_id, session).await);
        }

        let exit_status = match session.child.wait().await {
            Ok(status) => status,
            Err(e) => {
                let err = TrainerError::Process(format!("等待训练进程退出失败: {e}"));
                return Ok(self.abort_with_error(run_id, session, err).await);
            }
        };
        drop(session);

        if parser.rejected_lines() > 0 {
            warn!(rejected = parser.rejected_lines(), "部分指标行不符合协议，已忽略");
        }

        self.complete(run_id, exit_status.code(), &tag, &params, parser)
            .await
    }

    /// 读循环：逐行追加日志、提取指标并检查取消
    async fn pump(
        &self,
        run_id: &str,
        session: &mut ChildSession,
        parser: &mut MetricParser,
    ) -> TrainerResult<StreamEnd> {
        let yield_every = self.config.yield_every_lines.max(1);
        let mut watchdog = self.config.cancel_poll_interval_millis.map(|millis| {
            let mut interval = tokio::time::interval(Duration::from_millis(millis));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut line_count = 0usize;

        loop {
            let event = match watchdog.as_mut() {
                Some(interval) => tokio::select! {
                    event = session.lines.recv() => event,
                    _ = interval.tick() => {
                        if self.is_cancelled(run_id).await? {
                            debug!("看门狗检测到取消");
                            return Ok(StreamEnd::Cancelled);
                        }
                        continue;
                    }
                },
                None => session.lines.recv().await,
            };

            let line = match event {
                None => return Ok(StreamEnd::Eof),
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return Err(TrainerError::Process(format!("读取训练输出失败: {e}")));
                }
            };

            if line.is_empty() {
                continue;
            }

            self.runs.append_log(run_id, &format!("{line}\n")).await?;
            parser.observe(&line);
            line_count += 1;

            if self.is_cancelled(run_id).await? {
                return Ok(StreamEnd::Cancelled);
            }

            if line_count % yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    async fn complete(
        &self,
        run_id: &str,
        exit_code: Option<i32>,
        version_tag: &str,
        params: &HyperParameters,
        parser: MetricParser,
    ) -> TrainerResult<RunOutcome> {
        let rule = "=".repeat(60);
        let code_text = exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none (terminated by signal)".to_string());
        let mut log = format!("\n{rule}\nTraining process completed with return code: {code_text}\n{rule}\n");

        if exit_code == Some(0) {
            log.push_str("\nModel training completed successfully.\n");
            if let Some(ndcg) = parser.legacy_ndcg() {
                log.push_str(&format!("Validation NDCG@10: {ndcg:.4}\n"));
            }

            if !self
                .runs
                .finish(run_id, RunStatus::Success, Utc::now(), &log)
                .await?
            {
                info!("运行在进程退出后被取消，跳过版本发布");
                return Ok(RunOutcome::Cancelled);
            }

            info!(exit_code = 0, "训练成功，发布模型版本");
            let version = self
                .publisher
                .publish(run_id, version_tag, params, parser.metrics())
                .await;
            return Ok(RunOutcome::Succeeded { version });
        }

        log.push_str(&format!(
            "\nModel training failed with return code {code_text}.\nCheck the logs above for error details.\n"
        ));
        if !self
            .runs
            .finish(run_id, RunStatus::Failed, Utc::now(), &log)
            .await?
        {
            return Ok(RunOutcome::Cancelled);
        }

        warn!(?exit_code, "训练进程以非零退出码结束");
        Ok(RunOutcome::Failed { exit_code })
    }

    /// 取消路径：升级终止进程，关闭输出，保留 cancelled 状态并补写结束时间
    async fn handle_cancellation(&self, run_id: &str, mut session: ChildSession) -> RunOutcome {
        info!("运行已被取消，终止训练进程");
        self.append_quietly(
            run_id,
            "\nRun was cancelled during training, terminating process...\n",
        )
        .await;

        let outcome = escalate(&mut session.child, self.escalation_policy()).await;
        if outcome == TerminationOutcome::Unresponsive {
            warn!(pid = ?session.child.id(), "强制终止后训练进程可能仍在运行");
        }
        drop(session);

        let log = format!(
            "{}Training process terminated due to cancellation.\n",
            outcome.log_lines()
        );
        if let Err(e) = self.runs.stamp_cancelled(run_id, Utc::now(), &log).await {
            error!("更新已取消运行失败: {}", e);
        }
        RunOutcome::Cancelled
    }

    /// 异常路径：标记失败（cancelled 优先），终止进程并尽力读取剩余输出
    async fn abort_with_error(
        &self,
        run_id: &str,
        mut session: ChildSession,
        err: TrainerError,
    ) -> RunOutcome {
        error!("训练进程执行出错: {}", err);

        let status = self
            .runs
            .fail_unless_cancelled(
                run_id,
                Utc::now(),
                &format!("\nError executing training script: {err}\n"),
            )
            .await;

        if !matches!(session.child.try_wait(), Ok(Some(_))) {
            escalate(&mut session.child, self.escalation_policy()).await;
        }

        let drain_timeout = Duration::from_millis(self.config.drain_timeout_millis);
        let remaining = drain_output(&mut session.lines, drain_timeout).await;
        drop(session);

        if !remaining.is_empty() {
            self.append_quietly(
                run_id,
                &format!("\nRemaining output:\n{}\n", remaining.join("\n")),
            )
            .await;
        }

        match status {
            Ok(Some(RunStatus::Cancelled)) => RunOutcome::Cancelled,
            Ok(_) => RunOutcome::Failed { exit_code: None },
            Err(e) => {
                error!("记录运行失败状态出错: {}", e);
                RunOutcome::Failed { exit_code: None }
            }
        }
    }

    /// 监督之外的致命错误，完整错误写入运行日志
    async fn record_fatal(&self, run_id: &str, err: &TrainerError) -> RunOutcome {
        error!(run_id, "训练运行失败: {}", err);

        let note = match err {
            TrainerError::Launch(message) => format!("\nError executing training script: {message}\n"),
            other => format!("\nFatal error: {other}\n"),
        };

        match self.runs.fail_unless_cancelled(run_id, Utc::now(), &note).await {
            Ok(Some(RunStatus::Cancelled)) => RunOutcome::Cancelled,
            Ok(_) => RunOutcome::Failed { exit_code: None },
            Err(e) => {
                error!(run_id, "记录运行失败状态出错: {}", e);
                RunOutcome::Failed { exit_code: None }
            }
        }
    }

    async fn is_cancelled(&self, run_id: &str) -> TrainerResult<bool> {
        Ok(self.runs.get_status(run_id).await? == Some(RunStatus::Cancelled))
    }

    async fn append_quietly(&self, run_id: &str, text: &str) {
        if let Err(e) = self.runs.append_log(run_id, text).await {
            warn!(run_id, "追加运行日志失败: {}", e);
        }
    }
}

/// 在每行的超时内读取剩余输出
async fn drain_output(
    lines: &mut mpsc::Receiver<io::Result<String>>,
    per_line: Duration,
) -> Vec<String> {
    let mut remaining = Vec::new();
    while let Ok(Some(event)) = timeout(per_line, lines.recv()).await {
        match event {
            Ok(line) if !line.is_empty() => remaining.push(line),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    remaining
}
