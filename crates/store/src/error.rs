use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Detail payload returned by the store on failed requests.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct ApiErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Errors surfaced by the store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("API error: {message} (status {status})")]
    Api {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("unexpected row shape: {0}")]
    Decode(String),

    #[error("no row returned for {0}")]
    EmptyResult(&'static str),
}
