use chrono::{DateTime, Utc};
use shared::domain::JobHandle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The status line signalled that the download is ready.
    Completed,
    /// The backend reported a structured `failed` state.
    JobFailed,
    Cancelled,
    TooManyFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Stopped(StopReason),
}

/// One polling run for one job handle.
///
/// Owns its cancellation token and publishes state changes; `Stopped` is
/// absorbing.
#[derive(Debug)]
pub struct PollingSession {
    handle: JobHandle,
    cancel: CancellationToken,
    state: watch::Sender<PollState>,
    started_at: DateTime<Utc>,
}

impl PollingSession {
    pub fn new(handle: JobHandle) -> Self {
        let (state, _) = watch::channel(PollState::Polling);
        Self {
            handle,
            cancel: CancellationToken::new(),
            state,
            started_at: Utc::now(),
        }
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Suppresses every cycle not yet dispatched. A query already in flight
    /// still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == PollState::Polling
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Returns false when the session had already stopped.
    pub(crate) fn stop(&self, reason: StopReason) -> bool {
        self.state.send_if_modified(|state| match state {
            PollState::Stopped(_) => false,
            _ => {
                *state = PollState::Stopped(reason);
                true
            }
        })
    }

    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.state.subscribe();
        loop {
            if let PollState::Stopped(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return StopReason::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[test]
    fn stopped_is_absorbing() {
        let session = PollingSession::new(JobHandle::new("abc123"));
        assert!(session.is_active());

        assert!(session.stop(StopReason::Completed));
        assert!(!session.stop(StopReason::Cancelled));
        assert_eq!(session.state(), PollState::Stopped(StopReason::Completed));
        assert!(!session.is_active());
    }

    #[test]
    fn cancel_does_not_stop_by_itself() {
        let session = PollingSession::new(JobHandle::new("abc123"));
        session.cancel();
        assert!(session.is_cancelled());
        assert_eq!(session.state(), PollState::Polling);
    }

    #[tokio::test]
    async fn stopped_waits_for_the_transition() {
        let session = Arc::new(PollingSession::new(JobHandle::new("abc123")));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        session.stop(StopReason::TooManyFailures);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("join");
        assert_eq!(reason, StopReason::TooManyFailures);
    }
}
