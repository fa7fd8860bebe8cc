use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines},
    sync::Mutex,
};
use tracing::{debug, warn};

use super::{BrokerError, BrokerReply, BrokerRequest, BrokerTransport, HostChannelHandler};

/// Worker-side transport speaking newline-delimited JSON over a pair of
/// streams, normally the worker process's stdin and stdout.
pub struct StdioTransport<R, W> {
    io: Mutex<(Lines<R>, W)>,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps streams that may already have been partially consumed, e.g.
    /// after the execution context line has been read.
    pub fn new(lines: Lines<R>, writer: W) -> Self {
        Self {
            io: Mutex::new((lines, writer)),
        }
    }
}

#[async_trait]
impl<R, W> BrokerTransport for StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn call(&self, request: BrokerRequest) -> Result<String, BrokerError> {
        let mut line = serde_json::to_string(&request)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut io = self.io.lock().await;
        let (lines, writer) = &mut *io;

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let response = lines
            .next_line()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?
            .ok_or(BrokerError::Closed)?;

        let reply: BrokerReply = serde_json::from_str(&response)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;

        if reply.ok {
            Ok(reply.body)
        } else {
            Err(BrokerError::Remote {
                channel: request.channel,
                message: reply.body,
            })
        }
    }
}

/// Host-side loop answering the requests a worker writes to `reader` until
/// the worker closes its end.
pub async fn serve_worker_channel<R, W>(
    reader: R,
    mut writer: W,
    handler: HostChannelHandler,
) -> Result<(), BrokerError>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut lines = reader.lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| BrokerError::Transport(e.to_string()))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<BrokerRequest>(&line) {
            Ok(request) => match handler.handle(&request) {
                Ok(body) => BrokerReply { ok: true, body },
                Err(body) => BrokerReply { ok: false, body },
            },
            Err(e) => {
                warn!("⚠️ Worker sent an unreadable broker request: {}", e);
                BrokerReply {
                    ok: false,
                    body: format!("unreadable request: {e}"),
                }
            }
        };

        let mut encoded = serde_json::to_string(&reply)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        encoded.push('\n');
        writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
    }

    debug!("Worker closed its broker channel");
    Ok(())
}
