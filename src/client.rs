//! HTTP client for the Quip automation API.
//!
//! Every request attempt waits on the shared [`RateLimiter`] first. Responses
//! saying the per-credential budget was exceeded are retried with
//! exponential backoff; every other failure is returned to the caller as a
//! typed [`ApiError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, RetryConfig};
use crate::contract::{
    parse_threads_batch, ExportArtifact, ExportFormat, FailedChunk, FolderNode, FolderResponse,
    ThreadBatch, ThreadRecord, Workspace,
};
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

pub struct QuipClient {
    http: Client,
    base_url: String,
    batch_size: usize,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl QuipClient {
    /// # Arguments
    /// * `api` - Base URL, bearer token and batch cap
    /// * `rate_limiter` - Limiter shared with every other client of the run
    /// * `retry` - Backoff applied to rate-limited responses
    pub fn new(
        api: &ApiConfig,
        rate_limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", api.token))
            .map_err(|e| anyhow::anyhow!("API token is not a valid header value: {e}"))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("quip-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            batch_size: api.batch_size.max(1),
            rate_limiter,
            retry,
        })
    }

    /// Issue a GET, retrying while the server reports the budget as exceeded.
    async fn get(
        &self,
        resource: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        let mut retry = 0;
        loop {
            self.rate_limiter.acquire().await.map_err(|source| {
                warn!(error = %source, resource, "Rate limiter unavailable");
                ApiError::Limiter {
                    resource: resource.to_string(),
                    source,
                }
            })?;

            debug!(url = %url, attempt = retry + 1, "GET");
            let response = self
                .http
                .get(&url)
                .query(query)
                .send()
                .await
                .map_err(|source| ApiError::Transport {
                    resource: resource.to_string(),
                    source,
                })?;

            match classify(resource, &response) {
                Ok(()) => return Ok(response),
                Err(err) if err.is_rate_limited() && retry < self.retry.max_retries => {
                    let delay = retry_after(&response)
                        .map(|d| self.retry.cap(d))
                        .unwrap_or_else(|| self.retry.backoff(retry));
                    warn!(
                        resource,
                        attempt = retry + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited by server, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_json_bytes(
        &self,
        resource: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, ApiError> {
        let response = self.get(resource, path, query).await?;
        let body = response
            .bytes()
            .await
            .map_err(|source| ApiError::Transport {
                resource: resource.to_string(),
                source,
            })?;
        Ok(body.to_vec())
    }
}

impl QuipClient {
    async fn get_threads_chunk(
        &self,
        chunk: &[String],
    ) -> Result<HashMap<String, ThreadRecord>, ApiError> {
        let joined = chunk.join(",");
        let resource = format!("threads {joined}");
        let body = self
            .get_json_bytes(&resource, "/threads/", &[("ids", joined.clone())])
            .await?;
        parse_threads_batch(&body).map_err(|source| ApiError::Decode { resource, source })
    }
}

/// Map a response status onto the error taxonomy.
fn classify(resource: &str, response: &Response) -> Result<(), ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let resource = resource.to_string();
    Err(match status {
        StatusCode::NOT_FOUND => ApiError::NotFound { resource },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Forbidden { resource },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            ApiError::RateLimited { resource }
        }
        other => ApiError::Http {
            status: other.as_u16(),
            resource,
        },
    })
}

/// `Retry-After` in whole seconds, if the server sent one.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Workspace for QuipClient {
    async fn get_folder(&self, id: &str) -> Result<FolderNode, ApiError> {
        let resource = format!("folder {id}");
        let body = self
            .get_json_bytes(&resource, &format!("/folders/{id}"), &[])
            .await?;
        let parsed: FolderResponse =
            serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
                resource: resource.clone(),
                source,
            })?;
        let node = parsed.into_node(id);
        debug!(folder_id = %node.id, title = %node.title, children = node.children.len(), "Fetched folder");
        Ok(node)
    }

    async fn get_threads_batch(&self, ids: &[String]) -> ThreadBatch {
        let mut batch = ThreadBatch::default();
        for chunk in ids.chunks(self.batch_size) {
            match self.get_threads_chunk(chunk).await {
                Ok(records) => {
                    info!(requested = chunk.len(), returned = records.len(), "Fetched thread batch");
                    batch.records.extend(records);
                }
                Err(error) => {
                    warn!(requested = chunk.len(), error = %error, "Thread batch request failed");
                    batch.failed.push(FailedChunk {
                        thread_ids: chunk.to_vec(),
                        error,
                    });
                }
            }
        }
        batch
    }

    async fn export_thread(
        &self,
        id: &str,
        format: ExportFormat,
    ) -> Result<ExportArtifact, ApiError> {
        let resource = format!("thread {id} export {format}");
        let path = format!("/threads/{id}/export/{}", format.extension());
        let response = match self.get(&resource, &path, &[]).await {
            Err(ApiError::Http { status, resource }) if status == 400 || status == 415 => {
                return Err(ApiError::UnsupportedFormat { resource });
            }
            other => other?,
        };
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ApiError::Transport {
                resource: resource.clone(),
                source,
            })?;
        Ok(ExportArtifact {
            thread_id: id.to_string(),
            format,
            bytes: bytes.to_vec(),
        })
    }
}
