//! Fallback verifier for unknown or untyped tasks.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{submit, Verifier};
use crate::api::TaskApi;
use crate::types::{Task, TaskType, VerificationResult};

pub struct GenericVerifier {
    api: Arc<dyn TaskApi>,
}

impl GenericVerifier {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Verifier for GenericVerifier {
    fn verifier_type(&self) -> &str {
        TaskType::Generic.as_str()
    }

    async fn verify(&self, task_id: &str, _task: Option<&Task>) -> Result<VerificationResult> {
        Ok(submit(
            self.api.as_ref(),
            task_id,
            TaskType::Generic.as_str(),
            serde_json::json!({ "type": "generic" }),
            "Task verified successfully!",
        )
        .await)
    }
}
