//! ============================================================================
//! Verifier Module - Type-specific task verification
//! ============================================================================
//! One verifier per task type, all calling the backend through `TaskApi`:
//! - SocialVerifier: follow/subscribe tasks, platform detection, URL guard
//! - ReferralVerifier: social rules, tagged as referral
//! - LimitedVerifier: end date and completion cap checked locally first
//! - PartnerVerifier: partner allow-list and signed single-use links
//! - GenericVerifier: fallback for everything else
//!
//! Built-in verifiers never return `Err`; backend and network failures come
//! back as failed results. The core still guards custom verifiers that do.
//! ============================================================================

mod generic;
mod limited;
mod partner;
mod referral;
mod social;
pub mod url_guard;

pub use generic::GenericVerifier;
pub use limited::LimitedVerifier;
pub use partner::PartnerVerifier;
pub use referral::ReferralVerifier;
pub use social::{SocialPlatform, SocialVerifier};
pub use url_guard::{UrlGuard, UrlRejection};

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::api::{TaskApi, VerifyRequest};
use crate::types::{Task, VerificationResult};

/// Message shown when the backend cannot be reached
pub const NETWORK_FAILURE_MESSAGE: &str =
    "Could not reach the server to verify this task. Please try again.";

/// Capability every task type implements
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Registry tag this verifier was built for
    fn verifier_type(&self) -> &str;

    /// Verify one task. `task` is None when the store has no record of it.
    async fn verify(&self, task_id: &str, task: Option<&Task>) -> Result<VerificationResult>;
}

/// Send a verification request and turn any outcome into a result
pub(crate) async fn submit(
    api: &dyn TaskApi,
    task_id: &str,
    verification_type: &str,
    data: serde_json::Value,
    success_message: &str,
) -> VerificationResult {
    let request = VerifyRequest::new(task_id, verification_type, data);
    match api.verify_task(&request).await {
        Ok(response) => response.into_result(
            task_id,
            success_message,
            "Task is not completed yet. Please finish it and try again.",
        ),
        Err(e) => {
            warn!("Verification request for {} failed: {}", task_id, e);
            VerificationResult::failure(task_id, NETWORK_FAILURE_MESSAGE)
                .with_data(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::api::ApiVerifyResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// TaskApi double that records requests and replays a canned response
    pub struct MockApi {
        response: Mutex<Option<ApiVerifyResponse>>,
        delay: Duration,
        calls: AtomicUsize,
        requests: Mutex<Vec<VerifyRequest>>,
    }

    impl MockApi {
        pub fn responding(response: ApiVerifyResponse) -> Self {
            Self {
                response: Mutex::new(Some(response)),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Every call fails at the transport level
        pub fn unreachable() -> Self {
            Self {
                response: Mutex::new(None),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_request(&self) -> Option<VerifyRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl TaskApi for MockApi {
        async fn verify_task(&self, request: &VerifyRequest) -> Result<ApiVerifyResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let response = self.response.lock().unwrap().clone();
            response.ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }
}
