//! 进程终止升级
//!
//! 状态机: 发送终止信号 -> 等待 T1 -> 强制终止 -> 等待 T2 -> 放弃并告警。
//! 与具体的进程控制原语解耦，便于用假进程测试。

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

/// 升级过程中需要的进程控制原语
#[async_trait]
pub trait ProcessControl: Send {
    /// 优雅终止（unix 上为 SIGTERM）
    async fn terminate(&mut self) -> io::Result<()>;

    /// 强制终止
    fn kill(&mut self) -> io::Result<()>;

    /// 等待进程退出
    async fn wait_exit(&mut self) -> io::Result<()>;

    fn has_exited(&mut self) -> io::Result<bool>;
}

#[async_trait]
impl ProcessControl for Child {
    async fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            let Some(pid) = self.id() else {
                return Ok(());
            };
            let status = tokio::process::Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .status()
                .await?;
            if status.success() {
                Ok(())
            } else {
                Err(io::Error::other(format!("kill -TERM {pid} 退出码 {status}")))
            }
        }

        #[cfg(not(unix))]
        {
            self.start_kill()
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.start_kill()
    }

    async fn wait_exit(&mut self) -> io::Result<()> {
        self.wait().await.map(|_| ())
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        self.try_wait().map(|status| status.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub terminate_grace: Duration,
    pub kill_grace: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            terminate_grace: Duration::from_secs(5),
            kill_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// 开始升级前进程已退出
    AlreadyExited,
    /// 在 T1 内响应了终止信号
    Terminated,
    /// 在 T2 内被强制终止
    Killed,
    /// T2 之后仍未确认退出
    Unresponsive,
}

impl TerminationOutcome {
    /// 写入运行日志的说明
    pub fn log_lines(&self) -> &'static str {
        match self {
            TerminationOutcome::AlreadyExited | TerminationOutcome::Terminated => "",
            TerminationOutcome::Killed => {
                "Process did not terminate gracefully, forcing kill...\n"
            }
            TerminationOutcome::Unresponsive => {
                "Process did not terminate gracefully, forcing kill...\n\
                 Warning: Process may still be running after kill attempt\n"
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Signal,
    AwaitTerminate,
    Kill,
    AwaitKill,
}

/// 执行终止升级，直到进程退出或放弃
pub async fn escalate<P>(process: &mut P, policy: EscalationPolicy) -> TerminationOutcome
where
    P: ProcessControl + ?Sized,
{
    if let Ok(true) = process.has_exited() {
        return TerminationOutcome::AlreadyExited;
    }

    let mut stage = Stage::Signal;
    loop {
        stage = match stage {
            Stage::Signal => match process.terminate().await {
                Ok(()) => Stage::AwaitTerminate,
                Err(e) => {
                    warn!("发送终止信号失败: {}", e);
                    Stage::Kill
                }
            },
            Stage::AwaitTerminate => {
                match timeout(policy.terminate_grace, process.wait_exit()).await {
                    Ok(Ok(())) => {
                        debug!("进程已响应终止信号");
                        return TerminationOutcome::Terminated;
                    }
                    Ok(Err(e)) => {
                        warn!("等待进程退出失败: {}", e);
                        Stage::Kill
                    }
                    Err(_) => {
                        warn!("进程在 {:?} 内未退出，强制终止", policy.terminate_grace);
                        Stage::Kill
                    }
                }
            }
            Stage::Kill => match process.kill() {
                Ok(()) => Stage::AwaitKill,
                Err(e) => {
                    if let Ok(true) = process.has_exited() {
                        return TerminationOutcome::Killed;
                    }
                    warn!("强制终止进程失败: {}", e);
                    return TerminationOutcome::Unresponsive;
                }
            },
            Stage::AwaitKill => {
                return match timeout(policy.kill_grace, process.wait_exit()).await {
                    Ok(Ok(())) => TerminationOutcome::Killed,
                    Ok(Err(e)) => {
                        warn!("等待被强制终止的进程失败: {}", e);
                        TerminationOutcome::Unresponsive
                    }
                    Err(_) => {
                        warn!("进程在强制终止后 {:?} 内仍未退出", policy.kill_grace);
                        TerminationOutcome::Unresponsive
                    }
                };
            }
        };
    }
}
