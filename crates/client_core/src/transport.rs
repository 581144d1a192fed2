//! HTTP plumbing for the job-creation and status endpoints.

use async_trait::async_trait;
use reqwest::{
    header::CONTENT_TYPE,
    multipart::{Form, Part},
    Client, StatusCode,
};
use shared::{
    domain::{JobFlow, JobHandle},
    protocol::{CreateJobResponse, StatusRequest, StatusResponse},
};
use tracing::{debug, info};
use url::Url;

use crate::{
    config::Settings,
    error::{QueryFailure, SettingsError, SubmissionError},
    types::JobSubmission,
};

#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Issues exactly one job-creation request.
    async fn create_job(
        &self,
        flow: JobFlow,
        submission: JobSubmission,
    ) -> Result<JobHandle, SubmissionError>;

    /// Issues exactly one status request for `handle`.
    async fn query_status(&self, handle: &JobHandle) -> Result<StatusResponse, QueryFailure>;
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub finetune: Url,
    pub convert: Url,
    pub status: Url,
}

impl Endpoints {
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self {
            finetune: settings.endpoint(settings.create_path(JobFlow::FineTune))?,
            convert: settings.endpoint(settings.create_path(JobFlow::EbookConversion))?,
            status: settings.endpoint(&settings.status_path)?,
        })
    }

    pub fn create_url(&self, flow: JobFlow) -> &Url {
        match flow {
            JobFlow::FineTune => &self.finetune,
            JobFlow::EbookConversion => &self.convert,
        }
    }
}

pub struct HttpJobBackend {
    http: Client,
    endpoints: Endpoints,
}

impl HttpJobBackend {
    pub fn new(settings: &Settings) -> Result<Self, SettingsError> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoints: Endpoints::from_settings(settings)?,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn create_job(
        &self,
        flow: JobFlow,
        submission: JobSubmission,
    ) -> Result<JobHandle, SubmissionError> {
        let url = self.endpoints.create_url(flow).clone();
        info!(
            %flow,
            %url,
            fields = submission.fields().len(),
            file_name = %submission.attachment().file_name,
            size_bytes = submission.attachment().bytes.len(),
            "jobs: submitting"
        );
        let form = build_form(submission)?;

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(SubmissionError::from_transport)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(SubmissionError::from_transport)?;

        interpret_create_response(status, content_type.as_deref(), &body)
    }

    async fn query_status(&self, handle: &JobHandle) -> Result<StatusResponse, QueryFailure> {
        let response = self
            .http
            .post(self.endpoints.status.clone())
            .json(&StatusRequest {
                user_folder: handle.clone(),
            })
            .send()
            .await
            .map_err(QueryFailure::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryFailure::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(QueryFailure::from_transport)?;
        let parsed: StatusResponse = serde_json::from_slice(&body)
            .map_err(|e| QueryFailure::Malformed(e.to_string()))?;
        debug!(handle = %handle, status = %parsed.status, "poll: status received");
        Ok(parsed)
    }
}

fn build_form(submission: JobSubmission) -> Result<Form, SubmissionError> {
    let (fields, attachment) = submission.into_parts();

    let mut form = Form::new();
    for (name, value) in fields {
        form = form.text(name, value);
    }

    let mut part = Part::bytes(attachment.bytes).file_name(attachment.file_name);
    if let Some(mime_type) = attachment.mime_type {
        part = part
            .mime_str(&mime_type)
            .map_err(|e| SubmissionError::InvalidAttachment {
                reason: format!("bad mime type '{mime_type}': {e}"),
            })?;
    }
    Ok(form.part(attachment.field_name, part))
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|value| value.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// Maps a raw job-creation response onto a handle or a submission error.
///
/// Non-JSON payloads are malformed regardless of status. JSON error
/// responses surface the server's `error` text verbatim when it has one.
pub fn interpret_create_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<JobHandle, SubmissionError> {
    if !is_json_content_type(content_type) {
        return Err(SubmissionError::MalformedResponse);
    }

    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| SubmissionError::MalformedResponse)?;

    if !status.is_success() {
        let server_message = value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .filter(|message| !message.is_empty());
        return Err(SubmissionError::rejected(status.as_u16(), server_message));
    }

    let parsed: CreateJobResponse =
        serde_json::from_value(value).map_err(|_| SubmissionError::MalformedResponse)?;
    if let Some(message) = parsed.error_message() {
        return Err(SubmissionError::rejected(status.as_u16(), Some(message)));
    }

    parsed
        .user_folder
        .filter(|handle| !handle.as_str().is_empty())
        .ok_or(SubmissionError::MalformedResponse)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
