use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use serde::{Deserialize, Serialize};

/// One exception reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionDetail {
    pub message: String,
    pub full_text: String,
}

impl ExceptionDetail {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            full_text: message.clone(),
            message,
        }
    }
}

/// Mutable result accumulator of a single firing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionMetadata {
    pub effected_rows: Option<i32>,
    /// Percentage, always within 0..=100.
    pub progress: u8,
    pub information: String,
    pub exceptions: Vec<ExceptionDetail>,
}

impl ExecutionMetadata {
    /// All exceptions rendered as one text block, the format stored in the
    /// instance log.
    #[must_use]
    pub fn exceptions_text(&self) -> String {
        match self.exceptions.as_slice() {
            [] => String::new(),
            [single] => single.full_text.clone(),
            many => many
                .iter()
                .enumerate()
                .map(|(index, exception)| format!("[{}] {}", index + 1, exception.full_text))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Shared handle to the metadata of a firing. Every mutation takes the lock,
/// so concurrent tasks inside a worker can report safely.
#[derive(Debug, Clone, Default)]
pub struct MetadataHandle {
    metadata: Arc<Mutex<ExecutionMetadata>>,
    stop_requested: Arc<AtomicBool>,
}

impl MetadataHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionMetadata> {
        self.metadata.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append_information(&self, text: &str) {
        let mut metadata = self.lock();
        if !metadata.information.is_empty() {
            metadata.information.push('\n');
        }
        metadata.information.push_str(text);
    }

    pub fn add_exception(&self, exception: ExceptionDetail) {
        self.lock().exceptions.push(exception);
    }

    #[must_use]
    pub fn has_exceptions(&self) -> bool {
        !self.lock().exceptions.is_empty()
    }

    pub fn set_effected_rows(&self, rows: Option<i32>) {
        self.lock().effected_rows = rows;
    }

    /// Adds `delta` to the effected rows (starting from zero when unset) and
    /// returns the new value.
    pub fn increase_effected_rows(&self, delta: i32) -> i32 {
        let mut metadata = self.lock();
        let rows = metadata.effected_rows.unwrap_or(0).saturating_add(delta);
        metadata.effected_rows = Some(rows);
        rows
    }

    #[must_use]
    pub fn effected_rows(&self) -> Option<i32> {
        self.lock().effected_rows
    }

    pub fn update_progress(&self, progress: u8) {
        self.lock().progress = progress.min(100);
    }

    #[must_use]
    pub fn exceptions_text(&self) -> String {
        self.lock().exceptions_text()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> ExecutionMetadata {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped() {
        let handle = MetadataHandle::new();
        handle.update_progress(250);
        assert_eq!(handle.snapshot().progress, 100);
    }

    #[test]
    fn test_effected_rows_start_from_zero() {
        let handle = MetadataHandle::new();
        assert_eq!(handle.effected_rows(), None);
        assert_eq!(handle.increase_effected_rows(3), 3);
        assert_eq!(handle.increase_effected_rows(2), 5);
        handle.set_effected_rows(None);
        assert_eq!(handle.effected_rows(), None);
    }

    #[test]
    fn test_information_is_appended_line_by_line() {
        let handle = MetadataHandle::new();
        handle.append_information("first");
        handle.append_information("second");
        assert_eq!(handle.snapshot().information, "first\nsecond");
    }

    #[test]
    fn test_exceptions_text_numbers_multiple_entries() {
        let handle = MetadataHandle::new();
        handle.add_exception(ExceptionDetail::new("disk full"));
        assert_eq!(handle.exceptions_text(), "disk full");

        handle.add_exception(ExceptionDetail::new("timeout"));
        assert_eq!(handle.exceptions_text(), "[1] disk full\n[2] timeout");
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let handle = MetadataHandle::new();
        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle.increase_effected_rows(1);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(handle.effected_rows(), Some(20));
    }
}
