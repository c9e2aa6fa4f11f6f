//! ============================================================================
//! Partner Verifier - Signed partner links
//! ============================================================================
//! Partner links must point at an allow-listed partner domain. Before a link
//! is opened it is rewritten with `task_id`, `timestamp` and a single-use
//! anti-forgery `token`; the next verification of that task consumes the
//! token and sends it to the backend.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use super::url_guard::{UrlGuard, UrlRejection};
use super::{submit, Verifier};
use crate::api::TaskApi;
use crate::types::{now_millis, Task, TaskType, VerificationResult};

/// Issued tokens kept before the oldest is discarded
const MAX_PENDING_TOKENS: usize = 500;

#[derive(Debug, Clone)]
struct IssuedToken {
    token: String,
    issued_at: i64,
}

pub struct PartnerVerifier {
    api: Arc<dyn TaskApi>,
    guard: UrlGuard,
    tokens: Mutex<HashMap<String, IssuedToken>>,
}

impl PartnerVerifier {
    pub fn new(api: Arc<dyn TaskApi>, guard: UrlGuard) -> Self {
        Self {
            api,
            guard,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Vet a partner link and sign it for this task.
    /// Replaces any token previously issued for the task.
    pub async fn build_action_url(&self, task_id: &str, raw: &str) -> Result<Url, UrlRejection> {
        let mut url = self.guard.check(raw)?;
        let token = generate_token();
        let issued_at = now_millis();

        url.query_pairs_mut()
            .append_pair("task_id", task_id)
            .append_pair("timestamp", &issued_at.to_string())
            .append_pair("token", &token);

        let mut tokens = self.tokens.lock().await;
        if tokens.len() >= MAX_PENDING_TOKENS && !tokens.contains_key(task_id) {
            if let Some(oldest) = tokens
                .iter()
                .min_by_key(|(_, t)| t.issued_at)
                .map(|(k, _)| k.clone())
            {
                tokens.remove(&oldest);
            }
        }
        tokens.insert(task_id.to_string(), IssuedToken { token, issued_at });
        debug!("Issued partner token for task {}", task_id);

        Ok(url)
    }

    /// Remove and return the pending token for a task
    async fn take_token(&self, task_id: &str) -> Option<IssuedToken> {
        self.tokens.lock().await.remove(task_id)
    }

    pub async fn has_pending_token(&self, task_id: &str) -> bool {
        self.tokens.lock().await.contains_key(task_id)
    }
}

/// 32 random bytes, hex encoded
fn generate_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

#[async_trait]
impl Verifier for PartnerVerifier {
    fn verifier_type(&self) -> &str {
        TaskType::Partner.as_str()
    }

    async fn verify(&self, task_id: &str, task: Option<&Task>) -> Result<VerificationResult> {
        let Some(raw) = task.and_then(|t| t.action_url.as_deref()) else {
            return Ok(VerificationResult::failure(
                task_id,
                "Partner link is missing for this task.",
            ));
        };

        let url = match self.guard.check(raw) {
            Ok(url) => url,
            Err(rejection) => {
                warn!("Refusing partner task {}: {}", task_id, rejection);
                return Ok(VerificationResult::failure(
                    task_id,
                    "This partner link is not allowed.",
                ));
            }
        };

        let issued = self.take_token(task_id).await;
        if issued.is_none() {
            debug!("No partner token issued for {}", task_id);
        }

        let data = serde_json::json!({
            "type": TaskType::Partner.as_str(),
            "partner_name": task.and_then(|t| t.partner_name.as_deref()),
            "url": url.as_str(),
            "token": issued.as_ref().map(|t| t.token.as_str()),
            "timestamp": issued.as_ref().map(|t| t.issued_at),
        });
        Ok(submit(
            self.api.as_ref(),
            task_id,
            TaskType::Partner.as_str(),
            data,
            "Partner task verified!",
        )
        .await)
    }
}
