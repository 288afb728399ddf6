use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://platform.quip.com/1";

/// Fully resolved settings for one mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub mirror: TraversalConfig,
}

impl MirrorConfig {
    pub fn trace_loaded(&self) {
        info!(
            base_url = %self.api.base_url,
            root_folder_id = %self.mirror.root_folder_id,
            output_dir = %self.mirror.output_dir.display(),
            max_requests = self.rate_limit.max_requests,
            window_ms = self.rate_limit.window_ms,
            "Loaded MirrorConfig"
        );
        debug!(
            batch_size = self.api.batch_size,
            max_concurrent_folders = self.mirror.max_concurrent_folders,
            max_concurrent_documents = self.mirror.max_concurrent_documents,
            max_retries = self.retry.max_retries,
            "MirrorConfig tuning"
        );
    }
}

#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: String,
    /// Maximum number of thread ids per batch request.
    pub batch_size: usize,
}

// Keeps the token out of logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token_len", &self.token.len())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            window_ms: 5000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Backoff applied when the server answers "too many requests".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for the given zero-based retry, capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let delay_ms = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }

    pub fn cap(&self, delay: Duration) -> Duration {
        delay.min(Duration::from_millis(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone)]
pub struct TraversalConfig {
    pub root_folder_id: String,
    pub output_dir: PathBuf,
    /// Upper bound on folders being processed at the same time.
    pub max_concurrent_folders: usize,
    /// Upper bound on documents of one folder being written at the same time.
    pub max_concurrent_documents: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_millis(1000));
        assert_eq!(retry.backoff(1), Duration::from_millis(2000));
        assert_eq!(retry.backoff(4), Duration::from_millis(16000));
        assert_eq!(retry.backoff(5), Duration::from_millis(30000));
        assert_eq!(retry.backoff(60), Duration::from_millis(30000));
    }

    #[test]
    fn test_debug_hides_token() {
        let api = ApiConfig {
            base_url: DEFAULT_BASE_URL.into(),
            token: "super-secret".into(),
            batch_size: 10,
        };
        let rendered = format!("{api:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("token_len"));
    }
}
