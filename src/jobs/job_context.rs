use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    broker::{BrokerError, Channel, DataEntry, MessageBroker, Payload},
    execution::{ExceptionDetail, ExecutionContext},
};

use super::JobError;

/// What a running job sees: the immutable execution context plus the broker
/// through which every report and data change travels back to the host.
#[derive(Clone)]
pub struct JobContext {
    execution: Arc<ExecutionContext>,
    broker: Arc<MessageBroker>,
    cancellation: CancellationToken,
}

impl JobContext {
    #[must_use]
    pub fn new(
        execution: ExecutionContext,
        broker: MessageBroker,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution: Arc::new(execution),
            broker: Arc::new(broker),
            cancellation,
        }
    }

    #[must_use]
    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    #[must_use]
    pub fn fire_instance_id(&self) -> &str {
        self.execution.fire_instance_id()
    }

    /// Cancelled when the host stops this firing. Long running jobs should
    /// either watch it or poll [`Self::check_if_stop_requested`].
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub async fn append_information(&self, text: impl Into<String>) -> Result<(), JobError> {
        self.broker
            .publish(Channel::AppendInformation, Some(Payload::text(text)))
            .await?;
        Ok(())
    }

    /// Current value of `key`, including values put during this firing.
    pub async fn get_data(&self, key: &str) -> Result<Option<String>, JobError> {
        let response = self
            .broker
            .publish(Channel::GetData, Some(Payload::text(key)))
            .await?;
        serde_json::from_str(&response)
            .map_err(|e| JobError::Broker(BrokerError::Serialization(e.to_string())))
    }

    pub async fn data_contains_key(&self, key: &str) -> Result<bool, JobError> {
        let response = self
            .broker
            .publish(Channel::DataContainsKey, Some(Payload::text(key)))
            .await?;
        Ok(response == "true")
    }

    /// Stores a value in the job's data for this and future firings.
    pub async fn put_job_data(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), JobError> {
        self.put(Channel::PutJobData, key.into(), value.into()).await
    }

    /// Stores a value in the data of the trigger that fired this job.
    pub async fn put_trigger_data(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), JobError> {
        self.put(Channel::PutTriggerData, key.into(), value.into())
            .await
    }

    async fn put(&self, channel: Channel, key: String, value: String) -> Result<(), JobError> {
        let payload = Payload::json(&DataEntry { key, value })?;
        self.broker.publish(channel, Some(payload)).await?;
        Ok(())
    }

    pub async fn increase_effected_rows(&self, delta: i32) -> Result<i32, JobError> {
        let response = self
            .broker
            .publish(
                Channel::IncreaseEffectedRows,
                Some(Payload::text(delta.to_string())),
            )
            .await?;
        parse_rows(&response).map(Option::unwrap_or_default)
    }

    pub async fn set_effected_rows(&self, rows: Option<i32>) -> Result<(), JobError> {
        let payload = rows.map(|rows| Payload::text(rows.to_string()));
        self.broker
            .publish(Channel::SetEffectedRows, payload)
            .await?;
        Ok(())
    }

    pub async fn effected_rows(&self) -> Result<Option<i32>, JobError> {
        let response = self
            .broker
            .publish(Channel::GetEffectedRows, None)
            .await?;
        parse_rows(&response)
    }

    /// Reports progress as a percentage; values above 100 are clamped.
    pub async fn update_progress(&self, progress: u8) -> Result<(), JobError> {
        self.broker
            .publish(
                Channel::UpdateProgress,
                Some(Payload::text(progress.to_string())),
            )
            .await?;
        Ok(())
    }

    pub async fn check_if_stop_requested(&self) -> Result<bool, JobError> {
        if self.cancellation.is_cancelled() {
            return Ok(true);
        }
        let response = self
            .broker
            .publish(Channel::CheckIfStopRequest, None)
            .await?;
        Ok(response == "true")
    }

    /// Returns [`JobError::StopRequested`] once the host asked the job to stop.
    pub async fn fail_on_stop_request(&self) -> Result<(), JobError> {
        let response = self
            .broker
            .publish(Channel::FailOnStopRequest, None)
            .await?;
        if response == "true" || self.cancellation.is_cancelled() {
            return Err(JobError::StopRequested);
        }
        Ok(())
    }

    pub async fn exceptions_text(&self) -> Result<String, JobError> {
        Ok(self
            .broker
            .publish(Channel::GetExceptionsText, None)
            .await?)
    }

    /// Records an exception without aborting the job. A firing that recorded
    /// any exception ends as failed even when the job returns `Ok`.
    pub async fn add_aggregate_exception(
        &self,
        exception: ExceptionDetail,
    ) -> Result<(), JobError> {
        let payload = Payload::json(&exception)?;
        self.broker
            .publish(Channel::AddAggregateException, Some(payload))
            .await?;
        Ok(())
    }
}

fn parse_rows(response: &str) -> Result<Option<i32>, JobError> {
    if response.is_empty() {
        return Ok(None);
    }
    response
        .parse()
        .map(Some)
        .map_err(|_| {
            JobError::Broker(BrokerError::Serialization(format!(
                "bad row count '{response}'"
            )))
        })
}
