//! Item categorization boundary for the SharedPantry sync core.
//!
//! Maps a free-text item name to a category and a display glyph. The
//! preferred path is a hosted classification function; every failure on
//! that path degrades to the deterministic local fallback, so
//! classification as a whole never fails and works offline.

mod fallback;

use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use pantry_sync_store::Category;

pub use fallback::fallback_classify;

/// Icon shown while a classification is still in flight.
pub const PENDING_ICON: &str = "⏳";

/// Icon used when nothing more specific is known.
pub const FALLBACK_ICON: &str = "🛒";

/// Errors on the remote classification path. Callers of [`Classifier`]
/// never see these; they only matter for logging and tests.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("function error: {0}")]
    Function(String),
}

/// A category plus display glyph for one item name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub icon: String,
}

impl Classification {
    pub fn other() -> Self {
        Self { category: Category::Other, icon: FALLBACK_ICON.to_string() }
    }
}

/// Maps item names to categories. Infallible by contract: implementations
/// degrade internally rather than surfacing errors.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, item_name: &str) -> Classification;
}

/// Purely local classifier. Useful on its own in guest mode and as the
/// degradation target of [`RemoteClassifier`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackClassifier;

#[async_trait]
impl Classifier for FallbackClassifier {
    async fn classify(&self, item_name: &str) -> Classification {
        fallback_classify(item_name)
    }
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    category: Option<String>,
    icon: Option<String>,
}

/// Classifier backed by a hosted edge function, with the local rule table
/// as fallback.
pub struct RemoteClassifier {
    base_url: String,
    api_key: String,
    function_name: String,
    http_client: Client,
}

impl RemoteClassifier {
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            function_name: "categorize-item".to_string(),
            http_client,
        }
    }

    pub fn with_function_name(mut self, function_name: &str) -> Self {
        self.function_name = function_name.to_string();
        self
    }

    async fn invoke(&self, item_name: &str) -> Result<Classification, ClassifierError> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| ClassifierError::Url(url::ParseError::EmptyHost))?
            .push("functions")
            .push("v1")
            .push(&self.function_name);

        let response = self
            .http_client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .json(&serde_json::json!({ "name": item_name }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Function(error_text));
        }

        let body: ClassifyResponse = response.json().await?;
        let category = body
            .category
            .as_deref()
            .map(Category::parse_lenient)
            .unwrap_or(Category::Other);
        let icon = body
            .icon
            .filter(|icon| !icon.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_ICON.to_string());
        Ok(Classification { category, icon })
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, item_name: &str) -> Classification {
        match self.invoke(item_name).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!("remote classification failed, using fallback: {}", e);
                fallback_classify(item_name)
            }
        }
    }
}
