//! ============================================================================
//! WINIX-TASKS: Task verification pipeline
//! ============================================================================
//! Verifies that a Telegram Mini App user completed a reward task:
//! - Type detection and per-type verifiers (social, referral, limited,
//!   partner, generic) calling the WINIX backend via reqwest
//! - In-flight deduplication so concurrent requests share one attempt
//! - TTL cache for results and processed-event markers
//! - Idempotent progress writes and broadcast task events
//! - Task card presentation through the `TaskCardView` trait
//! ============================================================================

pub mod api;
pub mod cache;
pub mod config;
pub mod core;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod service;
pub mod store;
pub mod types;
pub mod ui;
pub mod verifier;

// Re-export main types for convenience
pub use types::*;
pub use api::{ApiVerifyResponse, HttpTaskApi, TaskApi, VerifyRequest};
pub use cache::{CacheManager, CacheStats};
pub use config::ServiceConfig;
pub use crate::core::VerificationCore;
pub use detector::TypeDetector;
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use error::{StoreError, VerificationError};
pub use service::VerificationService;
pub use store::{InMemoryTaskStore, TaskStore};
pub use ui::{TaskCardView, TracingCardView, UiController};
pub use verifier::{UrlGuard, UrlRejection, Verifier};
