use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{AccessLevel, ScopeKind, TokenScope};
use crate::services::{IssuedToken, NewAccessToken};

/// Longest lifetime an admin may give a token: one year.
const MAX_EXPIRES_IN_SECONDS: i64 = 31_536_000;

#[derive(Debug, Deserialize, Validate)]
pub struct IssueTokenRequest {
    /// Explicit tenant; overrides header and host resolution.
    #[validate(length(min = 1, max = 128, message = "Tenant id must be 1-128 characters"))]
    pub tenant_id: Option<String>,

    pub scope: ScopeKind,
    pub event_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,

    #[serde(default = "default_access_level")]
    pub access_level: AccessLevel,

    #[serde(default)]
    pub can_download: bool,

    #[validate(range(min = 1, message = "max_uses must be at least 1"))]
    pub max_uses: Option<i64>,

    #[validate(range(
        min = 60,
        max = 31536000,
        message = "expires_in_seconds must be between 60 seconds and one year"
    ))]
    pub expires_in_seconds: Option<i64>,

    #[validate(length(min = 1, max = 255))]
    pub created_by: Option<String>,

    pub metadata: Option<serde_json::Value>,
}

fn default_access_level() -> AccessLevel {
    AccessLevel::ReadOnly
}

impl IssueTokenRequest {
    pub fn into_new_token(self, now: DateTime<Utc>) -> NewAccessToken {
        let expires_at = self
            .expires_in_seconds
            .map(|secs| now + chrono::Duration::seconds(secs.min(MAX_EXPIRES_IN_SECONDS)));

        NewAccessToken {
            scope: self.scope,
            event_id: self.event_id,
            course_id: self.course_id,
            subject_id: self.subject_id,
            access_level: self.access_level,
            can_download: self.can_download,
            max_uses: self.max_uses,
            expires_at,
            created_by: self.created_by,
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    /// Shown once; only a salted hash is kept.
    pub token: String,
    pub token_id: Uuid,
    pub tenant_id: String,
    #[serde(flatten)]
    pub scope: TokenScope,
    pub access_level: AccessLevel,
    pub can_download: bool,
    pub max_uses: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<IssuedToken> for IssueTokenResponse {
    fn from(issued: IssuedToken) -> Self {
        let record = issued.record;
        Self {
            token: issued.token,
            token_id: record.id,
            tenant_id: record.tenant_id,
            scope: record.scope,
            access_level: record.access_level,
            can_download: record.can_download,
            max_uses: record.max_uses,
            expires_at: record.expires_at,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokeTokenResponse {
    pub token_id: Uuid,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReloadDomainsResponse {
    pub entries: usize,
}
