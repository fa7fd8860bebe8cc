use std::fmt::Write as _;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    Address, Message,
};
use tracing::debug;

use crate::mailer::{EmailError, Mailer};

use super::{Hook, HookError, MonitorDetails};

pub const EMAIL_HOOK: &str = "email";

/// Mails the monitor's recipient group, one message per recipient.
#[derive(Debug, Clone)]
pub struct EmailHook {
    mailer: Mailer,
}

impl EmailHook {
    #[must_use]
    pub const fn new(mailer: Mailer) -> Self {
        Self { mailer }
    }
}

fn subject(details: &MonitorDetails) -> String {
    format!(
        "[{}] {}: {}",
        details.info.environment, details.event_title, details.info.job_key
    )
}

fn body(details: &MonitorDetails) -> String {
    let info = &details.info;
    let mut body = String::new();
    let _ = writeln!(body, "Monitor: {}", details.monitor_title);
    let _ = writeln!(body, "Event: {}", details.event_title);
    let _ = writeln!(body, "Job: {} ({})", info.job_key, info.job_id);
    let _ = writeln!(body, "Fire instance: {}", info.fire_instance_id);
    let _ = writeln!(body, "Fire time: {}", info.fire_time.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(body, "Environment: {}", info.environment);
    if let Some(duration) = info.duration {
        let _ = writeln!(body, "Duration: {duration:?}");
    }
    if !info.data.is_empty() {
        let _ = writeln!(body, "Data:");
        for (key, value) in &info.data {
            let _ = writeln!(body, "  {key} = {value}");
        }
    }
    if let Some(text) = &info.exception_text {
        let _ = writeln!(body, "\n{text}");
    }
    body
}

#[async_trait]
impl Hook for EmailHook {
    fn name(&self) -> &str {
        EMAIL_HOOK
    }

    async fn handle(&self, details: &MonitorDetails) -> Result<(), HookError> {
        if details.recipients.is_empty() {
            debug!(
                "📧 Monitor {} has no recipients, nothing to send",
                details.monitor_id
            );
            return Ok(());
        }

        let sender = self.mailer.sender()?;
        let subject = subject(details);
        let body = body(details);

        for recipient in &details.recipients {
            let address: Address = recipient.email.parse().map_err(EmailError::from)?;
            let to = Mailbox::new(Some(recipient.name.clone()), address);
            let message = Message::builder()
                .from(sender.clone())
                .to(to)
                .subject(subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())
                .map_err(EmailError::from)?;

            self.mailer.send(message).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::execution::DataMap;
    use crate::monitor::{MonitorEvent, MonitorEventInfo, MonitorRecipient};
    use crate::scheduling::JobKey;

    fn details(recipients: Vec<MonitorRecipient>) -> MonitorDetails {
        MonitorDetails {
            event: MonitorEvent::ExecutionFail,
            event_title: MonitorEvent::ExecutionFail.title().to_string(),
            monitor_id: 7,
            monitor_title: "Import failures".to_string(),
            group_id: Some(1),
            recipients,
            info: MonitorEventInfo {
                job_key: JobKey::new("etl", "import"),
                job_id: "abc".to_string(),
                fire_instance_id: "node1".to_string(),
                fire_time: Utc::now(),
                environment: "test".to_string(),
                exception_text: Some("disk full".to_string()),
                duration: None,
                data: DataMap::new(),
            },
            global_config: DataMap::new(),
        }
    }

    fn recipient(email: &str) -> MonitorRecipient {
        MonitorRecipient {
            name: "Ops".to_string(),
            email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn test_one_message_per_recipient() {
        let mailer = Mailer::mock();
        let hook = EmailHook::new(mailer.clone());

        hook.handle(&details(vec![
            recipient("ops@example.com"),
            recipient("oncall@example.com"),
        ]))
        .await
        .unwrap();

        let messages = mailer.messages().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[1].envelope().to()[0].to_string(),
            "oncall@example.com"
        );
    }

    #[tokio::test]
    async fn test_invalid_address_is_an_error() {
        let hook = EmailHook::new(Mailer::mock());

        let result = hook.handle(&details(vec![recipient("not an address")])).await;

        assert!(matches!(result, Err(HookError::Email(_))));
    }

    #[test]
    fn test_body_contains_exception_text() {
        let text = body(&details(Vec::new()));

        assert!(text.contains("Job: etl.import (abc)"));
        assert!(text.ends_with("disk full\n"));
    }
}
