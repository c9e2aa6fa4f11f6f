//! ============================================================================
//! URL Guard - Action link safety checks
//! ============================================================================
//! Social and referral links: http/https only, blocklisted domains refused.
//! Partner links: additionally restricted to an allow-list of partner domains
//! (subdomains included). Script and local schemes are always refused.
//! ============================================================================

use tracing::warn;
use url::Url;

/// Schemes a task link may use
pub const SAFE_SCHEMES: &[&str] = &["http", "https"];

/// Schemes that are refused outright, before any parsing
pub const DANGEROUS_SCHEMES: &[&str] = &["javascript", "data", "file", "vbscript", "blob", "about"];

/// Why a link was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlRejection {
    #[error("Malformed URL: {0}")]
    Malformed(String),

    #[error("Unsafe URL scheme: {0}")]
    UnsafeScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("Domain is blocked: {0}")]
    BlockedDomain(String),

    #[error("Domain is not an allowed partner: {0}")]
    DomainNotAllowed(String),
}

/// Link checker for one task category
#[derive(Debug, Clone)]
pub struct UrlGuard {
    blocked_domains: Vec<String>,
    allowed_domains: Option<Vec<String>>,
}

impl UrlGuard {
    /// Guard for social/referral links
    pub fn social(blocked_domains: &[String]) -> Self {
        Self {
            blocked_domains: normalize(blocked_domains),
            allowed_domains: None,
        }
    }

    /// Guard for partner links
    pub fn partner(allowed_domains: &[String], blocked_domains: &[String]) -> Self {
        Self {
            blocked_domains: normalize(blocked_domains),
            allowed_domains: Some(normalize(allowed_domains)),
        }
    }

    /// Parse and vet a link
    pub fn check(&self, raw: &str) -> Result<Url, UrlRejection> {
        let trimmed = raw.trim();
        let lower = trimmed.to_lowercase();
        if let Some(scheme) = DANGEROUS_SCHEMES
            .iter()
            .find(|s| lower.starts_with(&format!("{}:", s)))
        {
            warn!("Refusing {} link", scheme);
            return Err(UrlRejection::UnsafeScheme(scheme.to_string()));
        }

        let url = Url::parse(trimmed).map_err(|e| UrlRejection::Malformed(e.to_string()))?;
        if !SAFE_SCHEMES.contains(&url.scheme()) {
            return Err(UrlRejection::UnsafeScheme(url.scheme().to_string()));
        }

        let host = url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or(UrlRejection::MissingHost)?;

        if self.blocked_domains.iter().any(|d| domain_matches(&host, d)) {
            warn!("Refusing link to blocked domain {}", host);
            return Err(UrlRejection::BlockedDomain(host));
        }

        if let Some(allowed) = &self.allowed_domains {
            if !allowed.iter().any(|d| domain_matches(&host, d)) {
                warn!("Refusing link to non-partner domain {}", host);
                return Err(UrlRejection::DomainNotAllowed(host));
            }
        }

        Ok(url)
    }

    pub fn is_safe(&self, raw: &str) -> bool {
        self.check(raw).is_ok()
    }
}

fn normalize(domains: &[String]) -> Vec<String> {
    domains
        .iter()
        .map(|d| d.trim().trim_start_matches("*.").to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Exact match or subdomain match
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}
