//! Time-limited asset URLs and the anti-hotlink guard in front of them.

use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use service_core::utils::signature::generate_asset_signature;
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use super::error::AccessError;
use super::resolver::ResolvedGrant;
use super::store::AssetCatalog;
use crate::config::SignedUrlConfig;

pub const MIN_TTL_SECONDS: u64 = 60;
pub const MAX_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlIntent {
    Preview,
    Download,
}

impl UrlIntent {
    pub fn disposition(&self) -> &'static str {
        match self {
            UrlIntent::Preview => "inline",
            UrlIntent::Download => "attachment",
        }
    }
}

/// Request attributes the issuer and the audit trail care about.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub expires_in_seconds: u64,
    /// Whether the consuming surface may offer a file-save action.
    pub downloadable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    Wildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AllowedOrigin {
    scheme: String,
    host: HostPattern,
    port: Option<u16>,
}

impl AllowedOrigin {
    /// Parse `scheme://host[:port]`, where host may start with `*.`.
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().trim_end_matches('/').to_ascii_lowercase();
        let (scheme, authority) = entry.split_once("://")?;
        if scheme.is_empty() || authority.is_empty() || authority.contains('/') {
            return None;
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().ok()?)),
            None => (authority, None),
        };
        let port = port.or_else(|| default_port(scheme));

        let host = match host.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() && !suffix.contains('*') => {
                HostPattern::Wildcard(suffix.to_string())
            }
            Some(_) => return None,
            None if host.is_empty() || host.contains('*') => return None,
            None => HostPattern::Exact(host.to_string()),
        };

        Some(Self {
            scheme: scheme.to_string(),
            host,
            port,
        })
    }

    fn matches(&self, origin: &Url) -> bool {
        let Some(host) = origin.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        let host_ok = match &self.host {
            HostPattern::Exact(exact) => *exact == host,
            HostPattern::Wildcard(suffix) => host
                .strip_suffix(suffix.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
                .is_some_and(|label| !label.is_empty()),
        };

        host_ok && self.scheme == origin.scheme() && self.port == origin.port_or_known_default()
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Rejects requests embedded by pages outside the allow-list.
#[derive(Debug, Clone, Default)]
pub struct HotlinkGuard {
    allowed: Vec<AllowedOrigin>,
}

impl HotlinkGuard {
    pub fn new(allowed_origins: &[String]) -> Self {
        let allowed = allowed_origins
            .iter()
            .filter_map(|entry| {
                let parsed = AllowedOrigin::parse(entry);
                if parsed.is_none() {
                    tracing::warn!(entry = %entry, "Ignoring unparsable allowed origin");
                }
                parsed
            })
            .collect();
        Self { allowed }
    }

    /// `Origin` is preferred over `Referer`; with neither present the
    /// request is a direct navigation and passes.
    pub fn check(&self, ctx: &RequestContext) -> Result<(), AccessError> {
        let Some(presented) = ctx.origin.as_deref().or(ctx.referer.as_deref()) else {
            return Ok(());
        };

        let parsed = Url::parse(presented)
            .map_err(|_| AccessError::AntiHotlinkRejected(presented.to_string()))?;

        if self.allowed.iter().any(|allowed| allowed.matches(&parsed)) {
            Ok(())
        } else {
            Err(AccessError::AntiHotlinkRejected(
                parsed.origin().ascii_serialization(),
            ))
        }
    }
}

/// Every `/`-separated segment of the key must survive as a URL path
/// segment, so the served path is exactly the key the signature covers.
fn is_addressable_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

#[derive(Clone)]
pub struct SignedUrlIssuer {
    catalog: Arc<dyn AssetCatalog>,
    guard: HotlinkGuard,
    base_url: String,
    ttl_seconds: u64,
    secret: Secret<String>,
}

impl SignedUrlIssuer {
    pub fn new(
        catalog: Arc<dyn AssetCatalog>,
        guard: HotlinkGuard,
        config: &SignedUrlConfig,
    ) -> Self {
        Self {
            catalog,
            guard,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ttl_seconds: config.ttl_seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS),
            secret: config.secret.clone(),
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Run the anti-hotlink guard alone, before a token is spent.
    pub fn check_origin(&self, ctx: &RequestContext) -> Result<(), AccessError> {
        self.guard.check(ctx)
    }

    pub async fn issue(
        &self,
        grant: &ResolvedGrant,
        asset_id: Uuid,
        ctx: &RequestContext,
        intent: UrlIntent,
    ) -> Result<SignedUrl, AccessError> {
        self.guard.check(ctx)?;

        let asset = self
            .catalog
            .find_asset(&grant.tenant_id, asset_id)
            .await
            .map_err(AccessError::SignedUrlIssuanceFailed)?
            .ok_or_else(|| AccessError::ScopeMismatch(format!("asset {}", asset_id)))?;

        if !asset.within(&grant.scope) {
            return Err(AccessError::ScopeMismatch(format!("asset {}", asset_id)));
        }

        if intent == UrlIntent::Download && !grant.can_download {
            return Err(AccessError::ScopeMismatch(
                "download not permitted for this grant".to_string(),
            ));
        }

        if !is_addressable_key(&asset.storage_key) {
            return Err(AccessError::SignedUrlIssuanceFailed(anyhow::anyhow!(
                "Storage key of asset {} is not addressable",
                asset_id
            )));
        }

        let expires_in = self.ttl_seconds;
        let expires_at = Utc::now().timestamp() + i64::try_from(expires_in).unwrap_or(3600);
        let disposition = intent.disposition();

        let signature = generate_asset_signature(
            self.secret.expose_secret(),
            &asset.storage_key,
            expires_at,
            disposition,
        )
        .map_err(|e| AccessError::SignedUrlIssuanceFailed(anyhow::anyhow!(e)))?;

        let mut url = Url::parse(&self.base_url).map_err(|e| {
            AccessError::SignedUrlIssuanceFailed(anyhow::anyhow!("Invalid signed URL base: {}", e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                AccessError::SignedUrlIssuanceFailed(anyhow::anyhow!(
                    "Signed URL base cannot carry a path"
                ))
            })?
            .pop_if_empty()
            .push("assets")
            .extend(asset.storage_key.split('/'));
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.to_string())
            .append_pair("disposition", disposition)
            .append_pair("sig", &signature);

        tracing::debug!(
            token_id = %grant.token_id,
            asset_id = %asset_id,
            disposition,
            expires_at,
            "Signed URL issued"
        );
        metrics::counter!("signed_urls_issued_total", "disposition" => disposition).increment(1);

        Ok(SignedUrl {
            url: url.to_string(),
            expires_at,
            expires_in_seconds: expires_in,
            downloadable: intent == UrlIntent::Download,
        })
    }
}
