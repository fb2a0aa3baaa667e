use hamro_core::CoreError;
use reqwest::StatusCode;

use crate::credentials::CredentialStoreError;

/// Errors surfaced by the marketplace client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A domain rule was violated before or after talking to the backend.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Login was rejected. Never carries the backend's wording.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// 401 that survived the refresh protocol; session state is cleared.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 400/422 from the backend.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No response was received.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Credential store error: {0}")]
    Storage(#[from] CredentialStoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Classify a non-success response by status code.
    ///
    /// `body` is the raw response text; a `{"detail": ...}` message is
    /// extracted when present.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = detail_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });
        match status.as_u16() {
            400 | 422 => ClientError::Validation(message),
            401 => ClientError::Unauthorized(message),
            403 => ClientError::Forbidden(message),
            404 => ClientError::NotFound(message),
            409 => ClientError::Core(CoreError::DuplicateApplication(message)),
            code if status.is_server_error() => ClientError::Server {
                status: code,
                message,
            },
            code => ClientError::Api {
                status: code,
                message,
            },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// Authorization failures end the session; everything else is
    /// transient or caller-specific.
    pub fn ends_session(&self) -> bool {
        self.is_unauthorized()
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

/// Extract a human-readable message from a `{"detail": ...}` body.
///
/// `detail` is either a string or a list of `{loc, msg}` objects (request
/// validation errors).
fn detail_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    let msg = item.get("msg")?.as_str()?;
                    let field = item
                        .get("loc")
                        .and_then(|loc| loc.as_array())
                        .and_then(|loc| loc.last())
                        .and_then(|f| f.as_str());
                    Some(match field {
                        Some(field) => format!("{field}: {msg}"),
                        None => msg.to_string(),
                    })
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        other => Some(other.to_string()),
    }
}
