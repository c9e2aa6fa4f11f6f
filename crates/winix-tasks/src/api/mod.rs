//! ============================================================================
//! API Module - Backend verification endpoint
//! ============================================================================
//! - TaskApi: the seam every verifier calls through
//! - HttpTaskApi: reqwest client for `POST .../tasks/{id}/verify`
//! - retry: failure classification and backoff
//! ============================================================================

mod http;
pub mod retry;

pub use http::HttpTaskApi;
pub use retry::{classify_status, classify_transport_error, FailureKind, RetryPolicy};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Reward, VerificationResult};

/// Backend verification API
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Submit a verification request. `Err` means the backend could not be
    /// reached or answered with something unparseable.
    async fn verify_task(&self, request: &VerifyRequest) -> Result<ApiVerifyResponse>;
}

/// JSON body of a verification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub task_id: String,
    #[serde(rename = "type")]
    pub verification_type: String,
    pub verification_data: serde_json::Value,
}

impl VerifyRequest {
    pub fn new(
        task_id: impl Into<String>,
        verification_type: impl Into<String>,
        verification_data: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            verification_type: verification_type.into(),
            verification_data,
        }
    }
}

/// Backend verification response. Both the `status: "success"` and the
/// `success: true` response shapes are accepted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiVerifyResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reward: Option<Reward>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ApiVerifyResponse {
    pub fn ok(message: impl Into<String>, reward: Option<Reward>) -> Self {
        Self {
            status: Some("success".into()),
            success: Some(true),
            message: Some(message.into()),
            reward,
            data: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: Some("error".into()),
            success: Some(false),
            message: Some(message.into()),
            reward: None,
            data: None,
        }
    }

    /// An explicit `success` flag wins over `status`
    pub fn is_success(&self) -> bool {
        match self.success {
            Some(success) => success,
            None => self
                .status
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case("success"))
                .unwrap_or(false),
        }
    }

    /// Reward from the top level or nested under `data.reward`
    pub fn reward(&self) -> Option<Reward> {
        self.reward.clone().or_else(|| {
            self.data
                .as_ref()
                .and_then(|d| d.get("reward"))
                .and_then(|r| serde_json::from_value(r.clone()).ok())
        })
    }

    /// Convert into a verification result, filling in default messages
    pub fn into_result(self, task_id: &str, success_message: &str, failure_message: &str) -> VerificationResult {
        let success = self.is_success();
        let reward = if success { self.reward() } else { None };
        let message = self
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                if success {
                    success_message.to_string()
                } else {
                    failure_message.to_string()
                }
            });

        let result = if success {
            VerificationResult::success(task_id, message)
        } else {
            VerificationResult::failure(task_id, message)
        };

        let result = result.with_reward(reward).with_status(self.status);
        match self.data {
            Some(data) => result.with_data(data),
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_shapes() {
        let by_status: ApiVerifyResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(by_status.is_success());

        let by_flag: ApiVerifyResponse =
            serde_json::from_str(r#"{"success":true,"message":"ok","reward":{"winix":10}}"#).unwrap();
        assert!(by_flag.is_success());
        assert_eq!(by_flag.reward(), Some(Reward::winix(10.0)));

        let conflicting: ApiVerifyResponse =
            serde_json::from_str(r#"{"status":"success","success":false}"#).unwrap();
        assert!(!conflicting.is_success());

        let empty: ApiVerifyResponse = serde_json::from_str("{}").unwrap();
        assert!(!empty.is_success());
    }

    #[test]
    fn test_nested_reward() {
        let response: ApiVerifyResponse =
            serde_json::from_str(r#"{"status":"success","data":{"reward":{"winix":5,"tokens":1}}}"#)
                .unwrap();
        let result = response.into_result("t", "done", "failed");
        assert!(result.success);
        assert_eq!(result.message, "done");
        assert_eq!(
            result.reward,
            Some(Reward {
                winix: 5.0,
                tokens: 1.0
            })
        );
    }

    #[test]
    fn test_failure_keeps_backend_message_and_drops_reward() {
        let response = ApiVerifyResponse {
            reward: Some(Reward::winix(3.0)),
            ..ApiVerifyResponse::rejected("Subscribe first")
        };
        let result = response.into_result("t", "done", "failed");
        assert!(!result.success);
        assert_eq!(result.message, "Subscribe first");
        assert!(result.reward.is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let request = VerifyRequest::new("t1", "social", serde_json::json!({"platform": "telegram"}));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "social");
        assert_eq!(json["verification_data"]["platform"], "telegram");
    }
}
