use std::{
    fmt::{self, Debug},
    sync::{Arc, Mutex, PoisonError},
};

use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

use crate::config::EmailConfig;

const MOCK_SENDER: &str = "cadence@localhost";

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] lettre::address::AddressError),
    #[error("Failed to build email: {0}")]
    BuilderError(#[from] lettre::error::Error),
    #[error("Failed to send email: {0}")]
    TransportError(#[from] lettre::transport::smtp::Error),
}

/// Mock transport that captures sent emails for testing.
#[derive(Clone, Default)]
pub struct MockTransport {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn store_message(&self, message: Message) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Mailer that can be either a real SMTP transport or a mock for testing.
///
/// The mock variant captures sent emails in memory, allowing tests to verify
/// that monitors notified someone without an SMTP server.
#[derive(Clone)]
pub enum Mailer {
    Smtp {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        sender: Mailbox,
    },
    Mock(MockTransport),
}

impl Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smtp { sender, .. } => f.debug_tuple("Mailer::Smtp").field(sender).finish(),
            Self::Mock(_) => f.debug_tuple("Mailer::Mock").finish(),
        }
    }
}

impl Mailer {
    pub fn mock() -> Self {
        Self::Mock(MockTransport::new())
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, EmailError> {
        match config {
            EmailConfig::Mock => Ok(Self::mock()),
            EmailConfig::Smtp {
                host,
                port,
                sender,
                username,
                password,
                use_tls,
            } => {
                let mut builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(host)?.port(*port)
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(*port)
                };

                if let (Some(username), Some(password)) = (username, password) {
                    builder = builder
                        .credentials(Credentials::new(username.clone(), password.clone()));
                }

                Ok(Self::Smtp {
                    transport: builder.build(),
                    sender: sender.clone(),
                })
            }
        }
    }

    pub fn sender(&self) -> Result<Mailbox, EmailError> {
        match self {
            Self::Smtp { sender, .. } => Ok(sender.clone()),
            Self::Mock(_) => Ok(MOCK_SENDER.parse()?),
        }
    }

    /// Send an email. For mock transport, stores the message for later inspection.
    pub async fn send(&self, message: Message) -> Result<(), EmailError> {
        match self {
            Self::Smtp { transport, .. } => {
                transport.send(message).await?;
                Ok(())
            }
            Self::Mock(mock) => {
                mock.store_message(message);
                Ok(())
            }
        }
    }

    /// Returns None if this is a real SMTP mailer.
    pub fn messages(&self) -> Option<Vec<Message>> {
        match self {
            Self::Mock(transport) => Some(transport.messages()),
            Self::Smtp { .. } => None,
        }
    }
}
