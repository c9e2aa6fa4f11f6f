//! ============================================================================
//! Limited Verifier - Time-boxed and capped tasks
//! ============================================================================
//! Expired or exhausted tasks fail locally, without a network round trip.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::{submit, Verifier};
use crate::api::TaskApi;
use crate::types::{Task, TaskType, VerificationResult};

pub const EXPIRED_MESSAGE: &str = "This task has expired.";
pub const EXHAUSTED_MESSAGE: &str = "This task has reached its completion limit.";

pub struct LimitedVerifier {
    api: Arc<dyn TaskApi>,
}

impl LimitedVerifier {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Verifier for LimitedVerifier {
    fn verifier_type(&self) -> &str {
        TaskType::Limited.as_str()
    }

    async fn verify(&self, task_id: &str, task: Option<&Task>) -> Result<VerificationResult> {
        if let Some(task) = task {
            if task.is_expired_at(Utc::now()) {
                info!("Limited task {} expired at {:?}", task_id, task.end_date);
                return Ok(VerificationResult::failure(task_id, EXPIRED_MESSAGE));
            }
            if task.is_exhausted() {
                info!(
                    "Limited task {} exhausted ({}/{:?})",
                    task_id, task.completions, task.max_completions
                );
                return Ok(VerificationResult::failure(task_id, EXHAUSTED_MESSAGE));
            }
        }

        let data = serde_json::json!({
            "type": TaskType::Limited.as_str(),
            "watch_duration": task.and_then(|t| t.watch_duration),
            "end_date": task.and_then(|t| t.end_date),
        });
        Ok(submit(
            self.api.as_ref(),
            task_id,
            TaskType::Limited.as_str(),
            data,
            "Limited task completed!",
        )
        .await)
    }
}
