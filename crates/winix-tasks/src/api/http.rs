//! ============================================================================
//! HTTP Task API - reqwest client for the WINIX backend
//! ============================================================================
//! `POST {base}/api/user/{user_id}/tasks/{task_id}/verify`, or
//! `POST {base}/api/tasks/{task_id}/verify` when no user id is configured.
//! 4xx responses with a JSON body are verdicts, not transport failures.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::retry::{classify_status, classify_transport_error, FailureKind, RetryPolicy};
use super::{ApiVerifyResponse, TaskApi, VerifyRequest};
use crate::config::ServiceConfig;

/// Executor for backend verification calls
pub struct HttpTaskApi {
    client: reqwest::Client,
    base_url: Url,
    user_id: Option<String>,
    retry: RetryPolicy,
}

impl HttpTaskApi {
    /// Create a client from the service configuration
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("winix-tasks/1.0")
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| anyhow!("Invalid API base URL '{}': {}", config.api_base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("API base URL '{}' cannot carry a path", config.api_base_url));
        }

        Ok(Self {
            client,
            base_url,
            user_id: config.user_id.clone(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..Default::default()
            },
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Endpoint for a task's verification; ids are pushed as single
    /// percent-encoded path segments
    pub fn verify_url(&self, task_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("API base URL cannot carry a path"))?;
            segments.pop_if_empty().push("api");
            if let Some(user_id) = &self.user_id {
                segments.push("user").push(user_id);
            }
            segments.push("tasks").push(task_id).push("verify");
        }
        Ok(url)
    }

    async fn send_once(&self, url: &Url, request: &VerifyRequest) -> Result<ApiVerifyResponse, (FailureKind, String)> {
        let mut builder = self
            .client
            .post(url.clone())
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(user_id) = &self.user_id {
            builder = builder.header("X-Telegram-User-Id", user_id);
        }

        let response = builder.send().await.map_err(|e| {
            let msg = format!("Failed to reach verification API: {}", e);
            (classify_transport_error(&msg), msg)
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                (
                    FailureKind::Final,
                    format!("Failed to parse verification response: {}", e),
                )
            });
        }

        let kind = classify_status(status.as_u16());
        if kind == FailureKind::Final {
            // Rejections come back as 4xx with a JSON message
            if let Ok(parsed) = serde_json::from_str::<ApiVerifyResponse>(&body) {
                return Ok(ApiVerifyResponse {
                    success: Some(false),
                    ..parsed
                });
            }
        }
        Err((kind, format!("Verification API error {}: {}", status, body)))
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn verify_task(&self, request: &VerifyRequest) -> Result<ApiVerifyResponse> {
        let url = self.verify_url(&request.task_id)?;
        info!("Verifying task {} ({})", request.task_id, request.verification_type);

        let mut retry = 0;
        loop {
            let (kind, error) = match self.send_once(&url, request).await {
                Ok(response) => {
                    debug!(
                        "Verification response for {}: success={}",
                        request.task_id,
                        response.is_success()
                    );
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            if kind == FailureKind::Final || retry >= self.retry.max_retries {
                warn!("Verification request for {} failed: {}", request.task_id, error);
                return Err(anyhow!(error));
            }

            let wait = match kind {
                FailureKind::RateLimited => self.retry.rate_limit_wait(),
                _ => self.retry.backoff(retry),
            };
            retry += 1;
            warn!(
                "Verification request for {} failed ({:?}), retry {}/{} in {:?}: {}",
                request.task_id, kind, retry, self.retry.max_retries, wait, error
            );
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_url_with_user() {
        let config = ServiceConfig {
            api_base_url: "https://api.example.com/".into(),
            user_id: Some("777".into()),
            ..Default::default()
        };
        let api = HttpTaskApi::new(&config).unwrap();
        assert_eq!(
            api.verify_url("task-42").unwrap().as_str(),
            "https://api.example.com/api/user/777/tasks/task-42/verify"
        );
    }

    #[test]
    fn test_verify_url_without_user() {
        let api = HttpTaskApi::new(&ServiceConfig::default()).unwrap();
        assert!(api.verify_url("t").unwrap().path().ends_with("/api/tasks/t/verify"));
    }

    #[test]
    fn test_verify_url_keeps_base_path() {
        let config = ServiceConfig {
            api_base_url: "https://example.com/winix".into(),
            ..Default::default()
        };
        let api = HttpTaskApi::new(&config).unwrap();
        assert_eq!(api.verify_url("t").unwrap().path(), "/winix/api/tasks/t/verify");
    }

    #[test]
    fn test_verify_url_encodes_ids() {
        let config = ServiceConfig {
            api_base_url: "https://api.example.com".into(),
            user_id: Some("7/../admin".into()),
            ..Default::default()
        };
        let api = HttpTaskApi::new(&config).unwrap();
        let url = api.verify_url("a/b?x=1#f").unwrap();

        assert_eq!(url.host_str(), Some("api.example.com"));
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(
            url.path(),
            "/api/user/7%2F..%2Fadmin/tasks/a%2Fb%3Fx=1%23f/verify"
        );
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 6);
        assert_eq!(segments.last(), Some(&"verify"));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let config = ServiceConfig {
            api_base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(HttpTaskApi::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let config = ServiceConfig {
            api_base_url: "http://127.0.0.1:9".into(),
            request_timeout_secs: 1,
            ..Default::default()
        };
        let api = HttpTaskApi::new(&config).unwrap().with_retry(RetryPolicy {
            max_retries: 0,
            jitter: false,
            ..Default::default()
        });
        let request = VerifyRequest::new("t", "generic", serde_json::json!({}));
        assert!(api.verify_task(&request).await.is_err());
    }
}
