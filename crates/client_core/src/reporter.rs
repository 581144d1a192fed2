//! Shared message modal used to surface failures (and the occasional success) to the user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{domain::Severity, error::ApiMessage};
use tokio::sync::Mutex;

#[async_trait]
pub trait ErrorReporter: Send + Sync {
    /// Shows `message`, replacing whatever was shown before.
    async fn report(&self, message: &str, severity: Severity);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModalVisibility {
    Shown,
    #[default]
    Hidden,
}

impl ModalVisibility {
    pub fn as_class(self) -> &'static str {
        match self {
            Self::Shown => "shown",
            Self::Hidden => "hidden",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalMessage {
    pub text: String,
    pub severity: Severity,
    pub shown_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModalState {
    pub visibility: ModalVisibility,
    pub message: Option<ModalMessage>,
    /// Total number of reports since creation.
    pub reports: u64,
}

#[derive(Debug, Default)]
pub struct ModalReporter {
    state: Mutex<ModalState>,
}

impl ModalReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> ModalState {
        self.state.lock().await.clone()
    }

    /// Close icon. Keeps the last message around for inspection.
    pub async fn dismiss(&self) {
        self.state.lock().await.visibility = ModalVisibility::Hidden;
    }

    pub async fn handle_api_message(&self, payload: &ApiMessage) {
        self.report(&payload.message, payload.status).await;
    }
}

#[async_trait]
impl ErrorReporter for ModalReporter {
    async fn report(&self, message: &str, severity: Severity) {
        let mut state = self.state.lock().await;
        state.message = Some(ModalMessage {
            text: message.to_string(),
            severity,
            shown_at: Utc::now(),
        });
        state.visibility = ModalVisibility::Shown;
        state.reports += 1;
    }
}
