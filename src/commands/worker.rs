use std::process;

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    broker::{BrokerError, MessageBroker, StdioTransport},
    execution::ExecutionContext,
    jobs::{job_registry::JobRegistry, JobContext, JobError},
};

/// Entry point of `worker --job <type>`. Exits non-zero with the error on
/// stderr, which the host turns into the firing's exception.
pub async fn handle_worker_command(job_registry: JobRegistry, job_type: &str) {
    let cancellation = CancellationToken::new();
    let on_signal = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = run_worker(
        &job_registry,
        job_type,
        BufReader::new(io::stdin()),
        io::stdout(),
        cancellation,
    )
    .await;

    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1);
    }
}

/// Reads the execution context from the first line of `reader`, then runs
/// the job with every report going back over the same streams.
pub async fn run_worker<R, W>(
    job_registry: &JobRegistry,
    job_type: &str,
    reader: R,
    writer: W,
    cancellation: CancellationToken,
) -> Result<(), JobError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = reader.lines();
    let first_line = lines
        .next_line()
        .await
        .map_err(|e| BrokerError::Transport(e.to_string()))?
        .ok_or_else(|| {
            BrokerError::Transport("host closed stdin before the execution context".to_string())
        })?;

    let execution: ExecutionContext = serde_json::from_str(&first_line)
        .map_err(|e| BrokerError::Serialization(e.to_string()))?;
    debug!("Worker received context for {}", execution.fire_instance_id());

    if !job_registry.contains(job_type) {
        return Err(JobError::UnknownJobType(job_type.to_string()));
    }

    let context = JobContext::new(
        execution,
        MessageBroker::new(StdioTransport::new(lines, writer)),
        cancellation,
    );
    let fire_instance_id = context.fire_instance_id().to_string();

    job_registry.execute(job_type, context).await?;

    info!("✅ Worker finished {}", fire_instance_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, split, AsyncWriteExt as _};

    use super::*;
    use crate::broker::{serve_worker_channel, HostChannelHandler};
    use crate::execution::MetadataHandle;
    use crate::scheduling::{JobDetail, JobKey};
    use crate::tests::setup_test::{execution_context, scripted_registry};

    #[tokio::test]
    async fn test_worker_runs_job_over_streams() {
        let job = JobDetail::worker(JobKey::new("etl", "echo"), "echo")
            .with_data("message", "hello");
        let context = execution_context(&job);

        let (worker_end, host_end) = duplex(4096);
        let (worker_read, worker_write) = split(worker_end);
        let (host_read, mut host_write) = split(host_end);

        let mut first_line = serde_json::to_string(&context).unwrap();
        first_line.push('\n');
        host_write.write_all(first_line.as_bytes()).await.unwrap();

        let metadata = MetadataHandle::new();
        let handler =
            HostChannelHandler::new(metadata.clone(), context.merged_job_data_map().clone());
        let server = tokio::spawn(serve_worker_channel(
            BufReader::new(host_read),
            host_write,
            handler.clone(),
        ));

        run_worker(
            &scripted_registry(),
            "echo",
            BufReader::new(worker_read),
            worker_write,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        server.await.unwrap().unwrap();
        let snapshot = metadata.snapshot();
        assert_eq!(snapshot.information, "hello");
        assert_eq!(snapshot.effected_rows, Some(1));
        assert_eq!(
            handler.job_data_updates().get("last_message").map(String::as_str),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_rejected() {
        let job = JobDetail::worker(JobKey::new("etl", "missing"), "missing");
        let mut input = serde_json::to_string(&execution_context(&job)).unwrap();
        input.push('\n');

        let result = run_worker(
            &scripted_registry(),
            "missing",
            BufReader::new(std::io::Cursor::new(input.into_bytes())),
            tokio::io::sink(),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(JobError::UnknownJobType(job_type)) if job_type == "missing"));
    }

    #[tokio::test]
    async fn test_missing_context_line_is_a_transport_error() {
        let result = run_worker(
            &scripted_registry(),
            "echo",
            BufReader::new(std::io::Cursor::new(Vec::new())),
            tokio::io::sink(),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(JobError::Broker(BrokerError::Transport(_)))));
    }
}
