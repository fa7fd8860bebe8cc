use async_trait::async_trait;

use super::{BrokerError, BrokerRequest, BrokerTransport, HostChannelHandler};

/// Transport for workers running inside the host process. Requests keep
/// their wire shape (channel name plus text payload) so that in-process and
/// out-of-process workers see exactly the same behaviour.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    handler: HostChannelHandler,
}

impl InProcessTransport {
    #[must_use]
    pub const fn new(handler: HostChannelHandler) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl BrokerTransport for InProcessTransport {
    async fn call(&self, request: BrokerRequest) -> Result<String, BrokerError> {
        self.handler
            .handle(&request)
            .map_err(|message| BrokerError::Remote {
                channel: request.channel,
                message,
            })
    }
}
