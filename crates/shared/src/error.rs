use serde::{Deserialize, Serialize};

use crate::domain::Severity;

/// Message payload the server sends for display in the shared modal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
    pub status: Severity,
}
