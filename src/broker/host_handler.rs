use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::execution::{is_system_key, DataMap, ExceptionDetail, MetadataHandle};

use super::{BrokerRequest, Channel, DataEntry};

#[derive(Debug, Default)]
struct DataState {
    merged: DataMap,
    job_updates: DataMap,
    trigger_updates: DataMap,
}

/// Host-side end of the channel: applies each request to the metadata and
/// data of one firing and produces the response text.
#[derive(Debug, Clone)]
pub struct HostChannelHandler {
    metadata: MetadataHandle,
    data: Arc<Mutex<DataState>>,
}

impl HostChannelHandler {
    #[must_use]
    pub fn new(metadata: MetadataHandle, merged_data: DataMap) -> Self {
        Self {
            metadata,
            data: Arc::new(Mutex::new(DataState {
                merged: merged_data,
                ..DataState::default()
            })),
        }
    }

    fn data(&self) -> MutexGuard<'_, DataState> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Job data written by the worker during this firing.
    #[must_use]
    pub fn job_data_updates(&self) -> DataMap {
        self.data().job_updates.clone()
    }

    /// Trigger data written by the worker during this firing.
    #[must_use]
    pub fn trigger_data_updates(&self) -> DataMap {
        self.data().trigger_updates.clone()
    }

    /// Answers one request. An `Err` carries the message sent back to the
    /// worker as a rejected call.
    pub fn handle(&self, request: &BrokerRequest) -> Result<String, String> {
        debug!("📬 Host received {}", request.channel);
        let payload = request.payload.as_deref();

        match request.channel {
            Channel::AppendInformation => {
                self.metadata.append_information(payload.unwrap_or_default());
                Ok(String::new())
            }
            Channel::GetData => {
                let key = required(payload)?;
                let value = self.data().merged.get(key).cloned();
                serde_json::to_string(&value).map_err(|e| e.to_string())
            }
            Channel::DataContainsKey => {
                let key = required(payload)?;
                Ok(self.data().merged.contains_key(key).to_string())
            }
            Channel::PutJobData | Channel::PutTriggerData => {
                let entry: DataEntry =
                    serde_json::from_str(required(payload)?).map_err(|e| e.to_string())?;
                if is_system_key(&entry.key) {
                    return Err(format!("data key '{}' is reserved", entry.key));
                }
                let mut data = self.data();
                data.merged.insert(entry.key.clone(), entry.value.clone());
                if request.channel == Channel::PutJobData {
                    data.job_updates.insert(entry.key, entry.value);
                } else {
                    data.trigger_updates.insert(entry.key, entry.value);
                }
                Ok(String::new())
            }
            Channel::IncreaseEffectedRows => {
                let delta = match payload {
                    None | Some("") => 1,
                    Some(value) => parse_number::<i32>(value)?,
                };
                Ok(self.metadata.increase_effected_rows(delta).to_string())
            }
            Channel::SetEffectedRows => {
                let rows = match payload {
                    None | Some("") => None,
                    Some(value) => Some(parse_number::<i32>(value)?),
                };
                self.metadata.set_effected_rows(rows);
                Ok(String::new())
            }
            Channel::GetEffectedRows => Ok(self
                .metadata
                .effected_rows()
                .map(|rows| rows.to_string())
                .unwrap_or_default()),
            Channel::UpdateProgress => {
                let progress = parse_number::<u8>(required(payload)?)?;
                self.metadata.update_progress(progress);
                Ok(String::new())
            }
            Channel::CheckIfStopRequest | Channel::FailOnStopRequest => {
                Ok(self.metadata.stop_requested().to_string())
            }
            Channel::GetExceptionsText => Ok(self.metadata.exceptions_text()),
            Channel::AddAggregateException => {
                let exception: ExceptionDetail =
                    serde_json::from_str(required(payload)?).map_err(|e| e.to_string())?;
                self.metadata.add_exception(exception);
                Ok(String::new())
            }
        }
    }
}

fn required(payload: Option<&str>) -> Result<&str, String> {
    payload.ok_or_else(|| "missing payload".to_string())
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a valid number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channel: Channel, payload: Option<&str>) -> BrokerRequest {
        BrokerRequest {
            channel,
            payload: payload.map(str::to_string),
        }
    }

    fn handler() -> HostChannelHandler {
        HostChannelHandler::new(
            MetadataHandle::new(),
            DataMap::from([
                ("path".to_string(), "/tmp".to_string()),
                ("__job_internal".to_string(), "x".to_string()),
            ]),
        )
    }

    #[test]
    fn test_put_job_data_is_visible_to_get_and_recorded() {
        let handler = handler();

        handler
            .handle(&request(
                Channel::PutJobData,
                Some(r#"{"key":"cursor","value":"42"}"#),
            ))
            .unwrap();

        assert_eq!(
            handler.handle(&request(Channel::GetData, Some("cursor"))),
            Ok(r#""42""#.to_string())
        );
        assert_eq!(
            handler.handle(&request(Channel::DataContainsKey, Some("cursor"))),
            Ok("true".to_string())
        );
        assert_eq!(handler.job_data_updates().get("cursor").unwrap(), "42");
        assert!(handler.trigger_data_updates().is_empty());
    }

    #[test]
    fn test_missing_data_key_returns_null() {
        assert_eq!(
            handler().handle(&request(Channel::GetData, Some("nope"))),
            Ok("null".to_string())
        );
    }

    #[test]
    fn test_reserved_keys_cannot_be_written() {
        let result = handler().handle(&request(
            Channel::PutTriggerData,
            Some(r#"{"key":"__retry_counter","value":"0"}"#),
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_effected_rows_channels() {
        let handler = handler();
        assert_eq!(
            handler.handle(&request(Channel::GetEffectedRows, None)),
            Ok(String::new())
        );
        assert_eq!(
            handler.handle(&request(Channel::IncreaseEffectedRows, None)),
            Ok("1".to_string())
        );
        assert_eq!(
            handler.handle(&request(Channel::IncreaseEffectedRows, Some("4"))),
            Ok("5".to_string())
        );
        handler
            .handle(&request(Channel::SetEffectedRows, Some("12")))
            .unwrap();
        assert_eq!(
            handler.handle(&request(Channel::GetEffectedRows, None)),
            Ok("12".to_string())
        );
        assert!(handler
            .handle(&request(Channel::SetEffectedRows, Some("many")))
            .is_err());
    }

    #[test]
    fn test_stop_request_is_reported() {
        let metadata = MetadataHandle::new();
        let handler = HostChannelHandler::new(metadata.clone(), DataMap::new());
        assert_eq!(
            handler.handle(&request(Channel::CheckIfStopRequest, None)),
            Ok("false".to_string())
        );

        metadata.request_stop();

        assert_eq!(
            handler.handle(&request(Channel::FailOnStopRequest, None)),
            Ok("true".to_string())
        );
    }

    #[test]
    fn test_aggregate_exception_is_recorded() {
        let metadata = MetadataHandle::new();
        let handler = HostChannelHandler::new(metadata.clone(), DataMap::new());

        handler
            .handle(&request(
                Channel::AddAggregateException,
                Some(r#"{"message":"row 3 invalid","full_text":"row 3 invalid: bad date"}"#),
            ))
            .unwrap();

        assert!(metadata.has_exceptions());
        assert_eq!(
            handler.handle(&request(Channel::GetExceptionsText, None)),
            Ok("row 3 invalid: bad date".to_string())
        );
    }
}
