use std::{
    future::Future,
    io,
    ops::ControlFlow,
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{error, info};
use thiserror::Error;
use tokio::{process::Command, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    client::{ClientError, QueueClient},
    model::{Job, TakeNext, Task},
    report::Reporter,
};

pub const STARTUP_DELAY: Duration = Duration::from_secs(3);

/// Consecutive failed cycles after which the launcher gives up and the process exits.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to start job {number} ({task}): {source}")]
    Spawn {
        number: u64,
        task: Task,
        source: io::Error,
    },
    #[error("failed waiting for job {number}: {source}")]
    Wait { number: u64, source: io::Error },
}

pub trait JobSource: Send + Sync {
    fn take_next(&self) -> impl Future<Output = Result<TakeNext, ClientError>> + Send;
}

impl JobSource for QueueClient {
    async fn take_next(&self) -> Result<TakeNext, ClientError> {
        self.get_job().await
    }
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub startup_delay: Duration,
    pub poll_interval: Duration,
    /// Runtime after which the watchdog raises an alert. The job is not killed.
    pub max_runtime: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherExit {
    Shutdown,
    TooManyFailures,
}

impl LauncherExit {
    pub fn exit_code(self) -> u8 {
        match self {
            LauncherExit::Shutdown => 0,
            LauncherExit::TooManyFailures => 1,
        }
    }
}

pub struct Launcher<S> {
    source: S,
    reporter: Arc<dyn Reporter>,
    config: LauncherConfig,
    consecutive_failures: u32,
}

impl<S: JobSource> Launcher<S> {
    pub fn new(source: S, reporter: Arc<dyn Reporter>, config: LauncherConfig) -> Launcher<S> {
        Launcher {
            source,
            reporter,
            config,
            consecutive_failures: 0,
        }
    }

    pub async fn run(mut self, cancellation_token: CancellationToken) -> LauncherExit {
        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => (),
            _ = cancellation_token.cancelled() => return LauncherExit::Shutdown,
        }
        info!("Job queue launcher started.");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => (),
                _ = cancellation_token.cancelled() => return LauncherExit::Shutdown,
            }
            if self.cycle().await.is_break() {
                return LauncherExit::TooManyFailures;
            }
        }
    }

    pub async fn cycle(&mut self) -> ControlFlow<()> {
        match self.claim_and_run().await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => self.record_failure(e),
        }
    }

    async fn claim_and_run(&mut self) -> Result<(), LauncherError> {
        let TakeNext::Job(job) = self.source.take_next().await? else {
            return Ok(());
        };

        info!("Starting job {}", job.number);
        let started = Instant::now();
        let mut child = Command::new(job.task.program())
            .args(job.task.args())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LauncherError::Spawn {
                number: job.number,
                task: job.task.clone(),
                source,
            })?;

        let watchdog = Watchdog::arm(&job, self.config.max_runtime, self.reporter.clone());
        let result = child.wait().await;
        drop(watchdog);

        let status = result.map_err(|source| LauncherError::Wait {
            number: job.number,
            source,
        })?;
        info!(
            "Finished job {}, elapsed time {:.2?}, result {}",
            job.number,
            started.elapsed(),
            status
        );
        self.consecutive_failures = 0;
        Ok(())
    }

    fn record_failure(&mut self, error: LauncherError) -> ControlFlow<()> {
        self.consecutive_failures += 1;
        error!("Error occurred in the job queue launcher: {}", error);
        self.reporter.report(
            "[Job Queue] Error in job queue launcher",
            &format!("An error occurred in the job queue launcher: {error}"),
        );

        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            error!(
                "{} consecutive errors in the job queue launcher, shutting down now",
                self.consecutive_failures
            );
            self.reporter.report(
                "[Job Queue] job queue server has stopped",
                &format!(
                    "{} consecutive errors occurred in the job queue launcher, so the job queue server is stopped now.",
                    self.consecutive_failures
                ),
            );
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

/// One-shot runtime alert for a running job. Dropping it cancels a pending alert.
struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn arm(job: &Job, max_runtime: Duration, reporter: Arc<dyn Reporter>) -> Watchdog {
        let number = job.number;
        let task = job.task.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(max_runtime).await;
            error!(
                "Job {} exceeded maxruntime of {}",
                number,
                format_runtime(max_runtime)
            );
            reporter.report(
                "[Job Queue] Job exceeded maximum runtime",
                &format!(
                    "Job {} exceeded maxruntime of {}:\n {}",
                    number,
                    format_runtime(max_runtime),
                    task
                ),
            );
        });
        Watchdog { handle }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn format_runtime(runtime: Duration) -> String {
    let seconds = runtime.as_secs();
    if seconds > 0 && seconds % 60 == 0 && runtime.subsec_nanos() == 0 {
        format!("{} minutes", seconds / 60)
    } else {
        format!("{:?}", runtime)
    }
}
