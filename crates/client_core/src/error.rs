use thiserror::Error;

pub const UNEXPECTED_RESPONSE_MESSAGE: &str = "received unexpected response from server.";

/// Why a job submission did not yield a handle.
///
/// `Display` is the text shown to the user.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{}", UNEXPECTED_RESPONSE_MESSAGE)]
    MalformedResponse,
    #[error("{message}")]
    ServerRejected { status: u16, message: String },
    #[error("could not reach the server; check your connection and try again.")]
    NetworkFailure { detail: String, timed_out: bool },
    #[error("invalid attachment: {reason}")]
    InvalidAttachment { reason: String },
    #[error("a job is already in progress; wait for it to finish before submitting another.")]
    SessionActive,
}

impl SubmissionError {
    /// Prefers the server's own message, falling back to the status code.
    pub fn rejected(status: u16, server_message: Option<&str>) -> Self {
        let message = match server_message {
            Some(message) => message.to_string(),
            None => format!("server responded with status {status}"),
        };
        Self::ServerRejected { status, message }
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        Self::NetworkFailure {
            timed_out: err.is_timeout(),
            detail: err.to_string(),
        }
    }
}

/// A single failed status query. Never fatal on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryFailure {
    #[error("status request timed out")]
    Timeout,
    #[error("status request failed: {0}")]
    Transport(String),
    #[error("status endpoint responded with status {0}")]
    Status(u16),
    #[error("status endpoint returned an unreadable body: {0}")]
    Malformed(String),
}

impl QueryFailure {
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid server url '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid endpoint path '{path}' for server '{url}': {source}")]
    InvalidEndpoint {
        url: String,
        path: String,
        source: url::ParseError,
    },
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
