use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{CoreError, CoreResult};

/// Session restoration is bounded so startup never hangs on a dead network;
/// past this it fails open to the unauthenticated state.
pub const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`PantryClient`](crate::PantryClient).
///
/// Prefer loading the URL and key from the environment or another secure
/// source rather than hardcoding them.
#[derive(Debug, Clone)]
pub struct PantryConfig {
    pub url: Url,
    pub anon_key: String,
    pub restore_timeout: Duration,
    /// Where the identity client persists its session between runs.
    pub session_path: Option<PathBuf>,
    /// Directory for the guest-mode snapshot. Without it, guest state is
    /// kept in memory only.
    pub guest_cache_dir: Option<PathBuf>,
}

impl PantryConfig {
    /// Create a configuration, validating the URL.
    pub fn new(url_str: &str, anon_key: &str) -> CoreResult<Self> {
        let url = Url::parse(url_str).map_err(|e| CoreError::Config(format!("invalid URL: {}", e)))?;
        if anon_key.is_empty() {
            return Err(CoreError::Config("anon_key cannot be empty".to_string()));
        }
        Ok(Self {
            url,
            anon_key: anon_key.to_string(),
            restore_timeout: DEFAULT_RESTORE_TIMEOUT,
            session_path: None,
            guest_cache_dir: None,
        })
    }

    /// Create a configuration from `PANTRY_SYNC_URL` and
    /// `PANTRY_SYNC_ANON_KEY`.
    pub fn from_env() -> CoreResult<Self> {
        let url_str = std::env::var("PANTRY_SYNC_URL").map_err(|_| {
            CoreError::Config("PANTRY_SYNC_URL environment variable not found".to_string())
        })?;
        let anon_key = std::env::var("PANTRY_SYNC_ANON_KEY").map_err(|_| {
            CoreError::Config("PANTRY_SYNC_ANON_KEY environment variable not found".to_string())
        })?;
        Self::new(&url_str, &anon_key)
    }

    pub fn with_restore_timeout(mut self, timeout: Duration) -> Self {
        self.restore_timeout = timeout;
        self
    }

    pub fn with_session_path(mut self, path: PathBuf) -> Self {
        self.session_path = Some(path);
        self
    }

    pub fn with_guest_cache_dir(mut self, dir: PathBuf) -> Self {
        self.guest_cache_dir = Some(dir);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config() {
        let config = PantryConfig::new("http://localhost:54321", "anon").unwrap();
        assert_eq!(config.anon_key, "anon");
        assert_eq!(config.restore_timeout, DEFAULT_RESTORE_TIMEOUT);
    }

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(
            PantryConfig::new("not a url", "anon"),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn rejects_empty_key() {
        match PantryConfig::new("http://localhost:54321", "") {
            Err(CoreError::Config(msg)) => assert!(msg.contains("anon_key")),
            other => panic!("expected Config error, got {:?}", other.map(|c| c.anon_key)),
        }
    }
}
