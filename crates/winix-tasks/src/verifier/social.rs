//! ============================================================================
//! Social Verifier - Follow / subscribe / join tasks
//! ============================================================================
//! Detects the platform from the action link, refuses unsafe links without
//! contacting the backend, and submits `{platform, url}` for verification.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::url_guard::UrlGuard;
use super::{submit, Verifier};
use crate::api::TaskApi;
use crate::types::{Task, TaskType, VerificationResult};

/// Platforms social tasks point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    Telegram,
    Twitter,
    Youtube,
    Discord,
    Instagram,
    Facebook,
    Tiktok,
    Other,
}

impl SocialPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Telegram => "telegram",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Youtube => "youtube",
            SocialPlatform::Discord => "discord",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Tiktok => "tiktok",
            SocialPlatform::Other => "other",
        }
    }

    /// Platform for a host name
    pub fn from_host(host: &str) -> Self {
        let host = host.trim_start_matches("www.").trim_start_matches("m.");
        match host {
            "t.me" | "telegram.me" | "telegram.org" => SocialPlatform::Telegram,
            "twitter.com" | "x.com" => SocialPlatform::Twitter,
            "youtube.com" | "youtu.be" => SocialPlatform::Youtube,
            "discord.gg" | "discord.com" => SocialPlatform::Discord,
            "instagram.com" => SocialPlatform::Instagram,
            "facebook.com" | "fb.com" => SocialPlatform::Facebook,
            "tiktok.com" => SocialPlatform::Tiktok,
            _ => SocialPlatform::Other,
        }
    }

    /// Platform for a link; unparseable links are `Other`
    pub fn from_url(raw: &str) -> Self {
        Url::parse(raw.trim())
            .ok()
            .and_then(|u| u.host_str().map(|h| Self::from_host(&h.to_lowercase())))
            .unwrap_or(SocialPlatform::Other)
    }

    /// Parse a declared platform name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "telegram" => Some(SocialPlatform::Telegram),
            "twitter" | "x" => Some(SocialPlatform::Twitter),
            "youtube" => Some(SocialPlatform::Youtube),
            "discord" => Some(SocialPlatform::Discord),
            "instagram" => Some(SocialPlatform::Instagram),
            "facebook" => Some(SocialPlatform::Facebook),
            "tiktok" => Some(SocialPlatform::Tiktok),
            _ => None,
        }
    }
}

/// Verifier for social tasks
pub struct SocialVerifier {
    api: Arc<dyn TaskApi>,
    guard: UrlGuard,
    task_type: TaskType,
}

impl SocialVerifier {
    pub fn new(api: Arc<dyn TaskApi>, guard: UrlGuard) -> Self {
        Self {
            api,
            guard,
            task_type: TaskType::Social,
        }
    }

    /// Same rules, reported under a different type tag
    pub(crate) fn tagged(api: Arc<dyn TaskApi>, guard: UrlGuard, task_type: TaskType) -> Self {
        Self {
            api,
            guard,
            task_type,
        }
    }
}

#[async_trait]
impl Verifier for SocialVerifier {
    fn verifier_type(&self) -> &str {
        self.task_type.as_str()
    }

    async fn verify(&self, task_id: &str, task: Option<&Task>) -> Result<VerificationResult> {
        if task.and_then(|t| t.requires_verification) == Some(false) {
            info!("Task {} does not require verification", task_id);
            return Ok(VerificationResult::success(task_id, "Task completed"));
        }

        let link = task.and_then(|t| t.action_url.as_deref());
        let url = match link.map(|raw| self.guard.check(raw)) {
            Some(Ok(url)) => Some(url),
            Some(Err(rejection)) => {
                warn!("Unsafe link on task {}: {}", task_id, rejection);
                return Ok(VerificationResult::failure(
                    task_id,
                    "This task link is not safe to open and cannot be verified.",
                ));
            }
            None => None,
        };

        let platform = task
            .and_then(|t| t.platform.as_deref())
            .and_then(SocialPlatform::from_name)
            .or_else(|| url.as_ref().map(|u| SocialPlatform::from_url(u.as_str())))
            .unwrap_or(SocialPlatform::Other);

        debug!("Verifying {} task {} on {}", self.task_type, task_id, platform.as_str());

        let data = serde_json::json!({
            "type": self.task_type.as_str(),
            "platform": platform.as_str(),
            "url": url.as_ref().map(|u| u.as_str()),
        });
        Ok(submit(
            self.api.as_ref(),
            task_id,
            self.task_type.as_str(),
            data,
            "Task verified successfully!",
        )
        .await)
    }
}
