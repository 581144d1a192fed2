//! Status polling loop.
//!
//! One query per cycle, strictly sequential. The display text is replaced on
//! every successful cycle; failed cycles leave it alone. Consecutive failures
//! are counted and the session stops once the budget is exhausted.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{JobHandle, JobState, Severity},
    protocol::{StatusResponse, StatusSnapshot},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    error::QueryFailure,
    reporter::ErrorReporter,
    session::{PollingSession, StopReason},
    storage::HandleStore,
    transport::JobBackend,
    JobEvent,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
pub const DEFAULT_TERMINAL_MARKER: &str = "Download";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_consecutive_failures: u32,
    pub terminal_marker: String,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            terminal_marker: DEFAULT_TERMINAL_MARKER.to_string(),
        }
    }
}

/// The one place that decides a prose status line means "done".
pub fn is_download_ready(status: &str, marker: &str) -> bool {
    status.contains(marker)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Pending,
    Succeeded,
    Failed,
}

/// A structured `state` wins over the prose marker when the backend sends one.
pub fn classify_status(response: &StatusResponse, marker: &str) -> Completion {
    match response.state {
        Some(JobState::Succeeded) => Completion::Succeeded,
        Some(JobState::Failed) => Completion::Failed,
        Some(JobState::Queued | JobState::Running) => Completion::Pending,
        None if is_download_ready(&response.status, marker) => Completion::Succeeded,
        None => Completion::Pending,
    }
}

#[async_trait]
pub trait StatusDisplay: Send + Sync {
    async fn show_status(&self, text: &str);
    async fn polling_stopped(&self, reason: StopReason);
}

#[derive(Clone)]
pub struct StatusPoller {
    backend: Arc<dyn JobBackend>,
    store: Arc<dyn HandleStore>,
    reporter: Arc<dyn ErrorReporter>,
    display: Arc<dyn StatusDisplay>,
    events: broadcast::Sender<JobEvent>,
    policy: PollPolicy,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        store: Arc<dyn HandleStore>,
        reporter: Arc<dyn ErrorReporter>,
        display: Arc<dyn StatusDisplay>,
        events: broadcast::Sender<JobEvent>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            backend,
            store,
            reporter,
            display,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn spawn(&self, session: Arc<PollingSession>) -> JoinHandle<StopReason> {
        let poller = self.clone();
        tokio::spawn(async move { poller.run(&session).await })
    }

    pub async fn run(&self, session: &PollingSession) -> StopReason {
        info!(
            handle = %session.handle(),
            interval = ?self.policy.interval,
            "poll: session started"
        );
        let mut consecutive_failures = 0u32;
        let mut cycle = 0u64;

        loop {
            if session.is_cancelled() {
                return self.finish(session, StopReason::Cancelled).await;
            }

            cycle += 1;
            let handle = self.current_handle(session).await;
            debug!(handle = %handle, cycle, "poll: querying status");

            match self.backend.query_status(&handle).await {
                Ok(response) => {
                    consecutive_failures = 0;
                    self.display.show_status(&response.status).await;
                    let _ = self.events.send(JobEvent::StatusUpdated(StatusSnapshot {
                        handle: handle.clone(),
                        text: response.status.clone(),
                        state: response.state,
                        observed_at: Utc::now(),
                    }));

                    match classify_status(&response, &self.policy.terminal_marker) {
                        Completion::Succeeded => {
                            return self.finish(session, StopReason::Completed).await;
                        }
                        Completion::Failed => {
                            self.reporter
                                .report(&response.status, Severity::Error)
                                .await;
                            return self.finish(session, StopReason::JobFailed).await;
                        }
                        Completion::Pending => {}
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(
                        handle = %handle,
                        cycle,
                        consecutive_failures,
                        max_consecutive_failures = self.policy.max_consecutive_failures,
                        "poll: status query failed: {err}"
                    );
                    let _ = self.events.send(JobEvent::PollFailed {
                        handle: handle.clone(),
                        consecutive_failures,
                        message: err.to_string(),
                    });

                    if consecutive_failures >= self.policy.max_consecutive_failures {
                        self.reporter
                            .report(&lost_contact_message(&err), Severity::Error)
                            .await;
                        return self.finish(session, StopReason::TooManyFailures).await;
                    }
                }
            }

            tokio::select! {
                _ = session.cancelled() => {}
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }

    /// Reads tab storage on every cycle; the session's own handle covers an
    /// emptied slot.
    async fn current_handle(&self, session: &PollingSession) -> JobHandle {
        match self.store.load_handle().await {
            Some(stored) => {
                if &stored != session.handle() {
                    warn!(
                        stored = %stored,
                        session = %session.handle(),
                        "poll: stored handle differs from session handle"
                    );
                }
                stored
            }
            None => session.handle().clone(),
        }
    }

    async fn finish(&self, session: &PollingSession, reason: StopReason) -> StopReason {
        if !session.stop(reason) {
            error!(handle = %session.handle(), ?reason, "poll: session was already stopped");
        }
        self.display.polling_stopped(reason).await;
        let _ = self.events.send(JobEvent::Stopped {
            handle: session.handle().clone(),
            reason,
        });
        info!(handle = %session.handle(), ?reason, "poll: session stopped");
        reason
    }
}

fn lost_contact_message(err: &QueryFailure) -> String {
    format!("Lost contact with the job server while checking progress ({err}).")
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
