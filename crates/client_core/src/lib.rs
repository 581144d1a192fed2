use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::{
    domain::{JobFlow, JobHandle, Severity},
    protocol::StatusSnapshot,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod page;
pub mod poller;
pub mod reporter;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use config::{load_settings, Settings};
pub use error::{QueryFailure, SettingsError, SubmissionError};
pub use page::{JobPage, PageHandle};
pub use poller::{PollPolicy, StatusDisplay, StatusPoller};
pub use reporter::{ErrorReporter, ModalReporter};
pub use session::{PollState, PollingSession, StopReason};
pub use storage::{HandleStore, TabStorage};
pub use transport::{HttpJobBackend, JobBackend};
pub use types::{FileAttachment, JobSubmission};

#[derive(Debug, Clone)]
pub enum JobEvent {
    Submitted {
        flow: JobFlow,
        handle: JobHandle,
    },
    SubmissionFailed {
        flow: JobFlow,
        message: String,
    },
    StatusUpdated(StatusSnapshot),
    PollFailed {
        handle: JobHandle,
        consecutive_failures: u32,
        message: String,
    },
    Stopped {
        handle: JobHandle,
        reason: StopReason,
    },
}

#[derive(Default)]
struct JobClientState {
    session: Option<Arc<PollingSession>>,
    poll_task: Option<JoinHandle<StopReason>>,
}

/// Held for the lifetime of one submission or resume, including when the
/// caller drops the future part-way. Dropping it clears the in-flight flag
/// and, unless disarmed, hands the form back to the user.
struct SubmissionGuard<'a> {
    submitting: &'a AtomicBool,
    page: &'a PageHandle,
    armed: bool,
}

impl SubmissionGuard<'_> {
    /// The page now belongs to a polling session or a finished one-shot job.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.page.submission_failed();
        }
        self.submitting.store(false, Ordering::Release);
    }
}

/// Submission controller for one page instance.
///
/// Owns tab storage, the page state and at most one polling session. A
/// submission while another is in flight or still polling is rejected.
pub struct JobClient {
    backend: Arc<dyn JobBackend>,
    store: Arc<dyn HandleStore>,
    reporter: Arc<dyn ErrorReporter>,
    page: PageHandle,
    poller: StatusPoller,
    events: broadcast::Sender<JobEvent>,
    submitting: AtomicBool,
    inner: Mutex<JobClientState>,
}

impl JobClient {
    pub fn from_settings(
        settings: &Settings,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, SettingsError> {
        let backend = HttpJobBackend::new(settings)?;
        Ok(Self::new_with_dependencies(
            Arc::new(backend),
            Arc::new(TabStorage::new()),
            reporter,
            settings.poll_policy(),
        ))
    }

    pub fn new_with_dependencies(
        backend: Arc<dyn JobBackend>,
        store: Arc<dyn HandleStore>,
        reporter: Arc<dyn ErrorReporter>,
        policy: PollPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let page = PageHandle::new();
        let poller = StatusPoller::new(
            backend.clone(),
            store.clone(),
            reporter.clone(),
            Arc::new(page.clone()),
            events.clone(),
            policy,
        );
        Self {
            backend,
            store,
            reporter,
            page,
            poller,
            events,
            submitting: AtomicBool::new(false),
            inner: Mutex::new(JobClientState::default()),
        }
    }

    pub fn page(&self) -> &PageHandle {
        &self.page
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub async fn poll_state(&self) -> PollState {
        match &self.inner.lock().await.session {
            Some(session) => session.state(),
            None => PollState::Idle,
        }
    }

    pub async fn active_session(&self) -> Option<Arc<PollingSession>> {
        self.inner
            .lock()
            .await
            .session
            .as_ref()
            .filter(|session| session.is_active())
            .cloned()
    }

    /// Sends `submission` once. On success the handle is stored in tab
    /// storage and, for polling flows, a fresh session starts.
    pub async fn submit(
        &self,
        flow: JobFlow,
        submission: JobSubmission,
    ) -> Result<JobHandle, SubmissionError> {
        let guard = self.begin_submission("submission").await?;

        let handle = match self.backend.create_job(flow, submission).await {
            Ok(handle) => handle,
            Err(err) => {
                drop(guard);
                warn!(%flow, "jobs: submission failed: {err:?}");
                let message = err.to_string();
                self.reporter.report(&message, Severity::Error).await;
                let _ = self
                    .events
                    .send(JobEvent::SubmissionFailed { flow, message });
                return Err(err);
            }
        };

        self.store.store_handle(handle.clone()).await;
        info!(%flow, handle = %handle, "jobs: submission accepted");
        let _ = self.events.send(JobEvent::Submitted {
            flow,
            handle: handle.clone(),
        });

        if flow.polls_status() {
            self.page.polling_started();
            self.start_session(handle.clone()).await;
        } else {
            self.page.one_shot_completed();
        }
        guard.disarm();

        Ok(handle)
    }

    /// Picks up a handle left in tab storage by an earlier submission.
    pub async fn resume_from_storage(
        &self,
    ) -> Result<Option<Arc<PollingSession>>, SubmissionError> {
        let Some(handle) = self.store.load_handle().await else {
            return Ok(None);
        };
        let guard = self.begin_submission("resume").await?;
        info!(handle = %handle, "jobs: resuming from tab storage");
        self.page.polling_started();
        let session = self.start_session(handle).await;
        guard.disarm();
        Ok(Some(session))
    }

    /// Returns false when nothing was polling.
    pub async fn cancel_polling(&self) -> bool {
        match self.active_session().await {
            Some(session) => {
                info!(handle = %session.handle(), "jobs: polling cancelled");
                session.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn wait_for_completion(&self) -> Option<StopReason> {
        let session = self.inner.lock().await.session.clone()?;
        Some(session.stopped().await)
    }

    /// Claims the client for one submission or resume. A busy client is
    /// reported once as a warning.
    async fn begin_submission(
        &self,
        action: &'static str,
    ) -> Result<SubmissionGuard<'_>, SubmissionError> {
        let state = self.inner.lock().await;
        let busy = self.submitting.load(Ordering::Acquire)
            || state
                .session
                .as_ref()
                .is_some_and(|session| session.is_active());
        if busy {
            drop(state);
            warn!(action, "jobs: rejected while another job is active");
            let err = SubmissionError::SessionActive;
            self.reporter
                .report(&err.to_string(), Severity::Warning)
                .await;
            return Err(err);
        }
        self.submitting.store(true, Ordering::Release);
        drop(state);

        self.page.submission_started();
        Ok(SubmissionGuard {
            submitting: &self.submitting,
            page: &self.page,
            armed: true,
        })
    }

    async fn start_session(&self, handle: JobHandle) -> Arc<PollingSession> {
        let mut state = self.inner.lock().await;
        let session = Arc::new(PollingSession::new(handle));
        let task = self.poller.spawn(session.clone());
        state.session = Some(session.clone());
        if let Some(previous) = state.poll_task.replace(task) {
            // The previous session has already stopped; this only reaps it.
            previous.abort();
        }
        session
    }
}

impl Drop for JobClient {
    fn drop(&mut self) {
        let state = self.inner.get_mut();
        if let Some(session) = &state.session {
            session.cancel();
        }
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
