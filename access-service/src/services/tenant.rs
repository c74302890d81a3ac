//! Request → tenant classification.
//!
//! Priority: explicit > header > domain (exact before wildcard) > default.
//! Resolution never fails; anything unrecognised lands on the default tenant.

use serde::Serialize;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    /// Full host, lower-cased.
    Exact(String),
    /// `*.suffix`: stores `suffix`; matches exactly one extra label.
    Wildcard(String),
}

impl DomainPattern {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern.is_empty() {
            return Err("empty host pattern".to_string());
        }

        match pattern.strip_prefix("*.") {
            Some(suffix) if suffix.is_empty() || suffix.contains('*') => {
                Err(format!("invalid wildcard pattern: {}", pattern))
            }
            Some(suffix) => Ok(DomainPattern::Wildcard(suffix.to_string())),
            None if pattern.contains('*') => {
                Err(format!("wildcard only allowed as leading label: {}", pattern))
            }
            None => Ok(DomainPattern::Exact(pattern)),
        }
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            DomainPattern::Exact(exact) => exact == host,
            DomainPattern::Wildcard(suffix) => host
                .strip_suffix(suffix.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
                .is_some_and(|label| !label.is_empty() && !label.contains('.')),
        }
    }
}

/// Ordered host-pattern → tenant pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantDomainMap {
    entries: Vec<(DomainPattern, String)>,
}

impl TenantDomainMap {
    pub fn new(entries: Vec<(DomainPattern, String)>) -> Self {
        Self { entries }
    }

    /// Parse `host=tenant` pairs separated by commas, e.g.
    /// `portal.example.com=t1,*.schools.example.com=t2`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut entries = Vec::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (pattern, tenant) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected host=tenant, got '{}'", pair))?;
            let tenant = tenant.trim();
            if tenant.is_empty() {
                return Err(format!("missing tenant for '{}'", pattern.trim()));
            }
            entries.push((DomainPattern::parse(pattern)?, tenant.to_string()));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, host: &str) -> Option<&str> {
        let exact = self
            .entries
            .iter()
            .find(|(p, _)| matches!(p, DomainPattern::Exact(_)) && p.matches(host));
        let wildcard = || {
            self.entries
                .iter()
                .find(|(p, _)| matches!(p, DomainPattern::Wildcard(_)) && p.matches(host))
        };

        exact.or_else(wildcard).map(|(_, tenant)| tenant.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantSource {
    Explicit,
    Header,
    Domain,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantResolution {
    pub tenant_id: String,
    pub source: TenantSource,
}

pub struct TenantResolver {
    default_tenant: String,
    domains: RwLock<TenantDomainMap>,
}

impl TenantResolver {
    pub fn new(default_tenant: impl Into<String>, domains: TenantDomainMap) -> Self {
        Self {
            default_tenant: default_tenant.into(),
            domains: RwLock::new(domains),
        }
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }

    /// Swap in a new domain map; subsequent resolutions see it immediately.
    pub fn replace_domains(&self, domains: TenantDomainMap) {
        let count = domains.len();
        match self.domains.write() {
            Ok(mut guard) => *guard = domains,
            Err(poisoned) => *poisoned.into_inner() = domains,
        }
        tracing::info!(entries = count, "Tenant domain map reloaded");
    }

    pub fn resolve(
        &self,
        explicit: Option<&str>,
        header: Option<&str>,
        host: Option<&str>,
    ) -> TenantResolution {
        if let Some(tenant) = non_blank(explicit) {
            return TenantResolution {
                tenant_id: tenant.to_string(),
                source: TenantSource::Explicit,
            };
        }

        if let Some(tenant) = non_blank(header) {
            return TenantResolution {
                tenant_id: tenant.to_string(),
                source: TenantSource::Header,
            };
        }

        if let Some(host) = host.map(normalize_host).filter(|h| !h.is_empty()) {
            let domains = match self.domains.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(tenant) = domains.lookup(&host) {
                return TenantResolution {
                    tenant_id: tenant.to_string(),
                    source: TenantSource::Domain,
                };
            }
        }

        tracing::debug!(host = ?host, "tenant unresolved, using default tenant");
        TenantResolution {
            tenant_id: self.default_tenant.clone(),
            source: TenantSource::Default,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Lower-case the host and drop any `:port` suffix and trailing dot.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}
