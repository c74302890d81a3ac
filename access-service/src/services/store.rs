//! Persistence seams of the authorization layer.
//!
//! Every lookup is tenant-scoped at the trait level, so an implementation
//! cannot return another tenant's rows by accident.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AccessLog, AccessToken, AssetRecord};

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, token: &AccessToken) -> Result<(), anyhow::Error>;

    /// Candidate rows of `tenant_id` sharing the given lookup key.
    async fn find_by_lookup(
        &self,
        tenant_id: &str,
        token_lookup: &str,
    ) -> Result<Vec<AccessToken>, anyhow::Error>;

    async fn find_by_id(
        &self,
        tenant_id: &str,
        token_id: Uuid,
    ) -> Result<Option<AccessToken>, anyhow::Error>;

    /// Atomically consume one use of a token.
    ///
    /// Increments `used_count` and sets `last_used_at = now` only if the token
    /// is not revoked, not expired at `now`, and has uses left. Returns the
    /// updated row, or `None` when the condition did not hold. This must be a
    /// single conditional update, never read-then-write.
    async fn consume_use(
        &self,
        tenant_id: &str,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, anyhow::Error>;

    /// Set `revoked_at` if it is not already set. Returns the current row.
    async fn revoke(
        &self,
        tenant_id: &str,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Append-only destination of audit records.
#[async_trait]
pub trait AccessLogSink: Send + Sync {
    async fn append(&self, entry: &AccessLog) -> Result<(), anyhow::Error>;
}

/// Read access to the upload pipeline's asset records.
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    async fn find_asset(
        &self,
        tenant_id: &str,
        asset_id: Uuid,
    ) -> Result<Option<AssetRecord>, anyhow::Error>;
}
