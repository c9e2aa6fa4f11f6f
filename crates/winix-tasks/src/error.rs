//! Error taxonomy for the verification pipeline.

use serde::{Deserialize, Serialize};

/// Errors surfaced by the verification core and service.
///
/// Backend rejections and network failures normally arrive as failed
/// [`VerificationResult`](crate::VerificationResult)s; the matching variants
/// here exist for callers that need to classify them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum VerificationError {
    #[error("Verification core used before initialization")]
    NotInitialized,

    #[error("Task id must not be empty")]
    InvalidTaskId,

    #[error("Invalid verifier: {0}")]
    InvalidVerifier(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Store write failed: {0}")]
    StoreWrite(#[from] StoreError),
}

/// Errors raised by a [`TaskStore`](crate::store::TaskStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}
