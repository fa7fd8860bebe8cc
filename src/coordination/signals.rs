use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{CoordinationError, StepKey, StepReport};

/// Waiters of every running coordinator, keyed by step.
#[derive(Clone, Default)]
pub struct SignalRegistry {
    waiters: Arc<DashMap<StepKey, oneshot::Sender<StepReport>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Signalled(StepReport),
    TimedOut,
    /// The run was released (cancelled or cleaned up) before the step
    /// reported.
    Released,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a wait for `key`. Must happen before the step is fired so a
    /// fast step cannot signal into the void. Re-registering a key releases
    /// the previous waiter.
    pub fn register(&self, key: StepKey) -> WaitHandle {
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(key.clone(), sender);

        WaitHandle {
            key,
            receiver,
            registry: self.clone(),
        }
    }

    pub fn signal(&self, key: &StepKey, report: StepReport) -> Result<(), CoordinationError> {
        let (_, sender) = self
            .waiters
            .remove(key)
            .ok_or_else(|| CoordinationError::NoWaiter(key.clone()))?;

        sender
            .send(report)
            .map_err(|_| CoordinationError::NoWaiter(key.clone()))
    }

    /// Drops every waiter of `run_id`, which wakes them up as released.
    pub fn release_run(&self, run_id: &str) -> usize {
        let before = self.waiters.len();
        self.waiters.retain(|key, _| key.run_id != run_id);
        before.saturating_sub(self.waiters.len())
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_waiting(&self, key: &StepKey) -> bool {
        self.waiters.contains_key(key)
    }
}

/// The coordinator's end of one registered wait. Dropping it unregisters
/// the wait.
pub struct WaitHandle {
    key: StepKey,
    receiver: oneshot::Receiver<StepReport>,
    registry: SignalRegistry,
}

impl WaitHandle {
    #[must_use]
    pub const fn key(&self) -> &StepKey {
        &self.key
    }

    /// Waits for the step's report. A cancelled run counts as released even
    /// when the cancellation landed before this handle was registered.
    pub async fn wait(
        mut self,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> WaitOutcome {
        tokio::select! {
            biased;
            () = cancellation.cancelled() => WaitOutcome::Released,
            outcome = tokio::time::timeout(timeout, &mut self.receiver) => match outcome {
                Ok(Ok(report)) => WaitOutcome::Signalled(report),
                Ok(Err(_)) => WaitOutcome::Released,
                Err(_) => WaitOutcome::TimedOut,
            },
        }
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.receiver.close();
        // Only our own sender is closed now; a newer registration of the same
        // key stays.
        self.registry
            .waiters
            .remove_if(&self.key, |_, sender| sender.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::StepEvent;
    use crate::scheduling::JobKey;

    fn key(run: &str, index: usize) -> StepKey {
        StepKey::new(JobKey::new("g", "step"), run, Some(index))
    }

    fn report(event: StepEvent) -> StepReport {
        StepReport {
            fire_instance_id: "f1".to_string(),
            event,
        }
    }

    #[tokio::test]
    async fn test_signal_reaches_waiter() {
        let registry = SignalRegistry::new();
        let handle = registry.register(key("run", 0));

        registry.signal(&key("run", 0), report(StepEvent::Success)).unwrap();

        assert_eq!(
            handle.wait(Duration::from_secs(1), &CancellationToken::new()).await,
            WaitOutcome::Signalled(report(StepEvent::Success))
        );
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_wait_times_out_and_unregisters() {
        let registry = SignalRegistry::new();
        let handle = registry.register(key("run", 0));

        let outcome = handle.wait(Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(registry.pending(), 0);
        assert_eq!(
            registry.signal(&key("run", 0), report(StepEvent::Fail)),
            Err(CoordinationError::NoWaiter(key("run", 0)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_run_only_touches_that_run() {
        let registry = SignalRegistry::new();
        let first = registry.register(key("a", 0));
        let second = registry.register(key("a", 1));
        let other = registry.register(key("b", 0));

        assert_eq!(registry.release_run("a"), 2);

        let running = CancellationToken::new();
        assert_eq!(first.wait(Duration::from_secs(60), &running).await, WaitOutcome::Released);
        assert_eq!(second.wait(Duration::from_secs(60), &running).await, WaitOutcome::Released);
        assert!(registry.is_waiting(other.key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancelled_before_registration_releases_at_once() {
        let registry = SignalRegistry::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        registry.release_run("run");

        let handle = registry.register(key("run", 0));
        let started = tokio::time::Instant::now();

        let outcome = handle.wait(Duration::from_secs(3600), &cancellation).await;

        assert_eq!(outcome, WaitOutcome::Released);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(registry.pending(), 0);
    }
}
