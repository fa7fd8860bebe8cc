use std::{any::Any, path::Path, process::Stdio};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    broker::{serve_worker_channel, BrokerError, HostChannelHandler},
    execution::ExecutionContext,
};

use super::JobError;

/// Subcommand the host passes to its own executable to start a worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// The host's handle on one running worker, in-process or not.
pub(crate) struct WorkerHandle {
    cancellation: CancellationToken,
    task: WorkerTask,
}

enum WorkerTask {
    Task {
        handle: JoinHandle<Result<(), JobError>>,
        result: Option<Result<(), JobError>>,
    },
    Process {
        child: Child,
        channel: Option<JoinHandle<Result<(), BrokerError>>>,
        stderr: Option<JoinHandle<String>>,
        stderr_text: String,
    },
}

impl WorkerHandle {
    pub(crate) fn spawn_task<F>(future: F, cancellation: CancellationToken) -> Self
    where
        F: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            cancellation,
            task: WorkerTask::Task {
                handle: tokio::spawn(future),
                result: None,
            },
        }
    }

    /// Starts `executable worker --job <job_type>`, hands it the execution
    /// context as the first stdin line and serves its broker requests.
    pub(crate) async fn spawn_process(
        executable: &Path,
        job_type: &str,
        context: &ExecutionContext,
        handler: HostChannelHandler,
        cancellation: CancellationToken,
    ) -> Result<Self, JobError> {
        let mut child = Command::new(executable)
            .arg(WORKER_SUBCOMMAND)
            .arg("--job")
            .arg(job_type)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Process(format!("failed to start worker process: {e}")))?;

        let missing = || JobError::Process("worker process stdio is not piped".to_string());
        let mut stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        let mut first_line = serde_json::to_string(context)
            .map_err(|e| JobError::Broker(BrokerError::Serialization(e.to_string())))?;
        first_line.push('\n');
        stdin
            .write_all(first_line.as_bytes())
            .await
            .map_err(|e| JobError::Broker(BrokerError::Transport(e.to_string())))?;

        debug!(
            "🚀 Started worker process {:?} for {}",
            child.id(),
            context.fire_instance_id()
        );

        let channel = tokio::spawn(serve_worker_channel(BufReader::new(stdout), stdin, handler));
        let stderr = tokio::spawn(async move {
            let mut text = String::new();
            if let Err(e) = BufReader::new(stderr).read_to_string(&mut text).await {
                warn!("Failed to read worker stderr: {}", e);
            }
            text
        });

        Ok(Self {
            cancellation,
            task: WorkerTask::Process {
                child,
                channel: Some(channel),
                stderr: Some(stderr),
                stderr_text: String::new(),
            },
        })
    }

    pub(crate) const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Waits for the worker to finish. Cancel safe: can be raced in a
    /// `select!` and awaited again afterwards.
    pub(crate) async fn wait(&mut self) -> Result<(), JobError> {
        match &mut self.task {
            WorkerTask::Task { handle, result } => {
                if result.is_none() {
                    let outcome = match handle.await {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_panic() => {
                            Err(JobError::Panicked(panic_message(&e.into_panic())))
                        }
                        Err(_) => Err(JobError::Cancelled),
                    };
                    *result = Some(outcome);
                }
                take_clone(result)
            }
            WorkerTask::Process {
                child,
                channel,
                stderr,
                stderr_text,
            } => {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| JobError::Process(e.to_string()))?;

                if let Some(handle) = channel.as_mut() {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("⚠️ Worker broker channel ended with error: {}", e),
                        Err(e) => warn!("⚠️ Worker broker channel task failed: {}", e),
                    }
                    *channel = None;
                }
                if let Some(handle) = stderr.as_mut() {
                    *stderr_text = handle.await.unwrap_or_default();
                    *stderr = None;
                }

                if status.success() {
                    Ok(())
                } else {
                    let detail = stderr_text.trim();
                    Err(JobError::Process(if detail.is_empty() {
                        format!("worker exited with {status}")
                    } else {
                        format!("worker exited with {status}: {detail}")
                    }))
                }
            }
        }
    }

    /// Forcefully stops the worker.
    pub(crate) async fn kill(&mut self) {
        match &mut self.task {
            WorkerTask::Task { handle, .. } => handle.abort(),
            WorkerTask::Process { child, .. } => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill worker process: {}", e);
                }
            }
        }
    }
}

/// Results are not `Clone` because `JobError` wraps non-clone errors, so a
/// repeated wait gets an equivalent error rebuilt from the message.
fn take_clone(result: &Option<Result<(), JobError>>) -> Result<(), JobError> {
    match result {
        Some(Ok(())) | None => Ok(()),
        Some(Err(JobError::Cancelled)) => Err(JobError::Cancelled),
        Some(Err(JobError::StopRequested)) => Err(JobError::StopRequested),
        Some(Err(e)) => Err(JobError::Failed(e.to_string())),
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
