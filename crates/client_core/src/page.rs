use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::{poller::StatusDisplay, session::StopReason};

pub const PROCESSING_PLACEHOLDER: &str = "Processing...";

/// Visible state of the upload page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPage {
    pub form_visible: bool,
    pub submit_enabled: bool,
    pub loading_visible: bool,
    pub status_visible: bool,
    pub status_text: String,
    /// Times the form inputs were cleared after a one-shot submission.
    pub form_resets: u32,
}

impl Default for JobPage {
    fn default() -> Self {
        Self {
            form_visible: true,
            submit_enabled: true,
            loading_visible: false,
            status_visible: false,
            status_text: String::new(),
            form_resets: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageHandle(Arc<Mutex<JobPage>>);

impl PageHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> JobPage {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Never held across an await, so it is safe to call from `Drop`.
    pub(crate) fn update(&self, f: impl FnOnce(&mut JobPage)) {
        let mut page = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut page);
    }

    pub(crate) fn submission_started(&self) {
        self.update(|page| {
            page.submit_enabled = false;
            page.loading_visible = true;
        });
    }

    /// Brings the form back exactly as the user filled it.
    pub(crate) fn submission_failed(&self) {
        self.update(|page| {
            page.submit_enabled = true;
            page.loading_visible = false;
            page.form_visible = true;
            page.status_visible = false;
        });
    }

    pub(crate) fn polling_started(&self) {
        self.update(|page| {
            page.loading_visible = false;
            page.form_visible = false;
            page.status_visible = true;
            page.status_text = PROCESSING_PLACEHOLDER.to_string();
        });
    }

    pub(crate) fn one_shot_completed(&self) {
        self.update(|page| {
            page.loading_visible = false;
            page.submit_enabled = true;
            page.form_resets += 1;
        });
    }
}

#[async_trait]
impl StatusDisplay for PageHandle {
    async fn show_status(&self, text: &str) {
        self.update(|page| page.status_text = text.to_string());
    }

    async fn polling_stopped(&self, _reason: StopReason) {
        self.update(|page| page.submit_enabled = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_submission_hands_the_form_back() {
        let page = PageHandle::new();
        page.submission_started();
        page.polling_started();

        page.submission_failed();

        let snapshot = page.snapshot();
        assert!(snapshot.form_visible);
        assert!(snapshot.submit_enabled);
        assert!(!snapshot.loading_visible);
        assert!(!snapshot.status_visible);
        assert_eq!(snapshot.form_resets, 0);
    }

    #[tokio::test]
    async fn status_display_replaces_text_verbatim() {
        let page = PageHandle::new();
        page.polling_started();
        assert_eq!(page.snapshot().status_text, PROCESSING_PLACEHOLDER);

        page.show_status("  Step 2/5 ").await;
        assert_eq!(page.snapshot().status_text, "  Step 2/5 ");

        page.polling_stopped(StopReason::Completed).await;
        assert!(page.snapshot().submit_enabled);
    }
}
