//! Typed request/response channel between a job host and its worker.
//!
//! The worker side publishes a [`Channel`] with an optional payload and
//! blocks until the host answers with a response text. Calls on one
//! [`MessageBroker`] are strictly serialized: the transports underneath are
//! not expected to multiplex concurrent calls.

mod host_handler;
mod in_process;
mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::trace;

pub use host_handler::HostChannelHandler;
pub use in_process::InProcessTransport;
pub use stdio::{serve_worker_channel, StdioTransport};

/// Closed set of message kinds a worker can send to its host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Channel {
    AppendInformation,
    GetData,
    PutJobData,
    PutTriggerData,
    DataContainsKey,
    IncreaseEffectedRows,
    SetEffectedRows,
    GetEffectedRows,
    UpdateProgress,
    CheckIfStopRequest,
    FailOnStopRequest,
    GetExceptionsText,
    AddAggregateException,
}

/// Payload of a published message. Text goes over the wire as-is,
/// structured values are serialized to JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, BrokerError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| BrokerError::Serialization(e.to_string()))
    }

    fn into_wire(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

/// Key/value payload of the `Put*Data` channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    pub key: String,
    pub value: String,
}

/// One request as carried by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerRequest {
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// The host's answer to a [`BrokerRequest`] on line-based transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerReply {
    pub ok: bool,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker transport failed: {0}")]
    Transport(String),
    #[error("broker payload could not be (de)serialized: {0}")]
    Serialization(String),
    #[error("host rejected {channel} request: {message}")]
    Remote { channel: Channel, message: String },
    #[error("broker channel is closed")]
    Closed,
}

/// Anything able to carry one request to the host and bring back its
/// response text.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn call(&self, request: BrokerRequest) -> Result<String, BrokerError>;
}

/// Worker-side entry point of the channel.
pub struct MessageBroker {
    transport: Mutex<Box<dyn BrokerTransport>>,
}

impl MessageBroker {
    pub fn new(transport: impl BrokerTransport + 'static) -> Self {
        Self {
            transport: Mutex::new(Box::new(transport)),
        }
    }

    /// Sends one message and waits for the response. Concurrent callers are
    /// queued and served one at a time, in order.
    pub async fn publish(
        &self,
        channel: Channel,
        payload: Option<Payload>,
    ) -> Result<String, BrokerError> {
        let request = BrokerRequest {
            channel,
            payload: payload.map(Payload::into_wire),
        };

        let transport = self.transport.lock().await;
        trace!("📨 Publishing {} to host", channel);
        transport.call(request).await
    }
}
