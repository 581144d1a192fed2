use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobHandle, JobState};

/// Body of a job-creation response.
///
/// Every field is optional on the wire: a success carries `user_folder`, a
/// rejection usually carries `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJobResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_folder: Option<JobHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CreateJobResponse {
    /// Server-supplied error text. An empty string counts as absent.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|message| !message.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub user_folder: JobHandle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
}

/// One status line as observed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub handle: JobHandle,
    pub text: String,
    pub state: Option<JobState>,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_response_accepts_minimal_success_body() {
        let body: CreateJobResponse =
            serde_json::from_str(r#"{"status":"ok","user_folder":"abc123"}"#).expect("decode");
        assert_eq!(body.user_folder, Some(JobHandle::new("abc123")));
        assert!(body.error.is_none());
    }

    #[test]
    fn empty_error_field_is_treated_as_missing() {
        let body: CreateJobResponse = serde_json::from_str(r#"{"error":""}"#).expect("decode");
        assert_eq!(body.error_message(), None);

        let body: CreateJobResponse =
            serde_json::from_str(r#"{"error":"  File is not UTF-8 encoded "}"#).expect("decode");
        assert_eq!(body.error_message(), Some("  File is not UTF-8 encoded "));
    }

    #[test]
    fn status_request_serializes_handle_as_plain_string() {
        let body = serde_json::to_value(StatusRequest {
            user_folder: JobHandle::new("abc123"),
        })
        .expect("encode");
        assert_eq!(body, serde_json::json!({ "user_folder": "abc123" }));
    }

    #[test]
    fn status_response_state_is_optional() {
        let prose: StatusResponse =
            serde_json::from_str(r#"{"status":"Processing"}"#).expect("decode");
        assert_eq!(prose.state, None);

        let structured: StatusResponse =
            serde_json::from_str(r#"{"status":"done","state":"succeeded"}"#).expect("decode");
        assert_eq!(structured.state, Some(JobState::Succeeded));
    }
}
