use thiserror::Error;

/// Errors surfaced by the feed boundary.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
