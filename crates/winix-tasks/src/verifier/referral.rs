//! Referral verifier: social link rules, submitted as `referral`.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::social::SocialVerifier;
use super::url_guard::UrlGuard;
use super::Verifier;
use crate::api::TaskApi;
use crate::types::{Task, TaskType, VerificationResult};

pub struct ReferralVerifier {
    inner: SocialVerifier,
}

impl ReferralVerifier {
    pub fn new(api: Arc<dyn TaskApi>, guard: UrlGuard) -> Self {
        Self {
            inner: SocialVerifier::tagged(api, guard, TaskType::Referral),
        }
    }
}

#[async_trait]
impl Verifier for ReferralVerifier {
    fn verifier_type(&self) -> &str {
        TaskType::Referral.as_str()
    }

    async fn verify(&self, task_id: &str, task: Option<&Task>) -> Result<VerificationResult> {
        self.inner.verify(task_id, task).await
    }
}
