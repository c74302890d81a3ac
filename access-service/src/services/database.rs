//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::store::{AccessLogSink, AssetCatalog, TokenStore};
use crate::models::{AccessLog, AccessToken, AccessTokenRow, AssetRecord};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: Uuid,
    tenant_id: String,
    event_id: Uuid,
    course_id: Option<Uuid>,
    storage_key: String,
    subject_ids: Vec<Uuid>,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn into_tokens(rows: Vec<AccessTokenRow>) -> Vec<AccessToken> {
        rows.into_iter()
            .filter_map(|row| {
                let id = row.id;
                AccessToken::try_from(row)
                    .map_err(|e| {
                        tracing::error!(token_id = %id, error = %e, "Access token row failed integrity check");
                        e
                    })
                    .ok()
            })
            .collect()
    }

    fn into_token(row: Option<AccessTokenRow>) -> Result<Option<AccessToken>, anyhow::Error> {
        row.map(AccessToken::try_from).transpose()
    }
}

#[async_trait]
impl TokenStore for Database {
    async fn insert_token(&self, token: &AccessToken) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO access_tokens (
                id, tenant_id, scope, event_id, course_id, subject_id, access_level,
                can_download, token_lookup, token_hash, token_salt, max_uses, used_count,
                expires_at, revoked_at, last_used_at, created_at, created_by, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(token.id)
        .bind(&token.tenant_id)
        .bind(token.scope.kind().as_str())
        .bind(token.scope.event_id())
        .bind(token.scope.course_id())
        .bind(token.scope.subject_id())
        .bind(token.access_level.as_str())
        .bind(token.can_download)
        .bind(&token.token_lookup)
        .bind(&token.token_hash)
        .bind(&token.token_salt)
        .bind(token.max_uses)
        .bind(token.used_count)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.last_used_at)
        .bind(token.created_at)
        .bind(&token.created_by)
        .bind(&token.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_lookup(
        &self,
        tenant_id: &str,
        token_lookup: &str,
    ) -> Result<Vec<AccessToken>, anyhow::Error> {
        let rows = sqlx::query_as::<_, AccessTokenRow>(
            "SELECT * FROM access_tokens WHERE tenant_id = $1 AND token_lookup = $2",
        )
        .bind(tenant_id)
        .bind(token_lookup)
        .fetch_all(&self.pool)
        .await?;
        Ok(Self::into_tokens(rows))
    }

    async fn find_by_id(
        &self,
        tenant_id: &str,
        token_id: Uuid,
    ) -> Result<Option<AccessToken>, anyhow::Error> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            "SELECT * FROM access_tokens WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Self::into_token(row)
    }

    async fn consume_use(
        &self,
        tenant_id: &str,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, anyhow::Error> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            r#"
            UPDATE access_tokens
            SET used_count = used_count + 1, last_used_at = $3
            WHERE tenant_id = $1
              AND id = $2
              AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > $3)
              AND (max_uses IS NULL OR used_count < max_uses)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(token_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Self::into_token(row)
    }

    async fn revoke(
        &self,
        tenant_id: &str,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, anyhow::Error> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            r#"
            UPDATE access_tokens
            SET revoked_at = COALESCE(revoked_at, $3)
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(token_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Self::into_token(row)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl AccessLogSink for Database {
    async fn append(&self, entry: &AccessLog) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO access_logs (
                id, tenant_id, access_token_id, token_mask, occurred_at, ip, user_agent,
                path, action, ok, response_time_ms, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.tenant_id)
        .bind(entry.access_token_id)
        .bind(&entry.token_mask)
        .bind(entry.occurred_at)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(&entry.path)
        .bind(entry.action.as_str())
        .bind(entry.ok)
        .bind(entry.response_time_ms)
        .bind(&entry.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AssetCatalog for Database {
    async fn find_asset(
        &self,
        tenant_id: &str,
        asset_id: Uuid,
    ) -> Result<Option<AssetRecord>, anyhow::Error> {
        let row = sqlx::query_as::<_, AssetRow>(
            r#"
            SELECT a.id, a.tenant_id, a.event_id, a.course_id, a.storage_key,
                   COALESCE(
                       ARRAY_AGG(s.subject_id) FILTER (WHERE s.subject_id IS NOT NULL),
                       '{}'
                   ) AS subject_ids
            FROM assets a
            LEFT JOIN asset_subjects s ON s.asset_id = a.id
            WHERE a.tenant_id = $1 AND a.id = $2
            GROUP BY a.id
            "#,
        )
        .bind(tenant_id)
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AssetRecord {
            id: r.id,
            tenant_id: r.tenant_id,
            event_id: r.event_id,
            course_id: r.course_id,
            subject_ids: r.subject_ids,
            storage_key: r.storage_key,
        }))
    }
}
