//! Presented token → grant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AccessError;
use super::store::TokenStore;
use super::token;
use crate::models::{AccessLevel, AccessToken, TokenScope};

/// What a successfully resolved token entitles the caller to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedGrant {
    pub token_id: Uuid,
    pub tenant_id: String,
    #[serde(flatten)]
    pub scope: TokenScope,
    pub access_level: AccessLevel,
    pub can_download: bool,
    /// Use count after this resolution.
    pub used_count: i64,
    pub max_uses: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<AccessToken> for ResolvedGrant {
    fn from(token: AccessToken) -> Self {
        Self {
            token_id: token.id,
            tenant_id: token.tenant_id,
            scope: token.scope,
            access_level: token.access_level,
            can_download: token.can_download,
            used_count: token.used_count,
            max_uses: token.max_uses,
            expires_at: token.expires_at,
        }
    }
}

#[derive(Clone)]
pub struct TokenResolver {
    store: Arc<dyn TokenStore>,
}

impl TokenResolver {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        tenant_id: &str,
        presented: &str,
    ) -> Result<ResolvedGrant, AccessError> {
        self.resolve_at(tenant_id, presented, Utc::now()).await
    }

    /// Resolve against an explicit clock. Counts one use on success.
    pub async fn resolve_at(
        &self,
        tenant_id: &str,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedGrant, AccessError> {
        let result = self.resolve_inner(tenant_id, presented, now).await;

        let outcome = match &result {
            Ok(_) => "valid",
            Err(e) => e.code(),
        };
        metrics::counter!("access_token_resolutions_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(grant) => tracing::debug!(
                token_id = %grant.token_id,
                tenant_id = %tenant_id,
                used_count = grant.used_count,
                "Access token resolved"
            ),
            Err(e) if e.is_rejection() => tracing::info!(
                tenant_id = %tenant_id,
                token_mask = %token::mask_token(presented),
                code = e.code(),
                "Access token rejected"
            ),
            Err(e) => tracing::error!(
                tenant_id = %tenant_id,
                token_mask = %token::mask_token(presented),
                error = %e,
                "Access token resolution failed"
            ),
        }

        result
    }

    async fn resolve_inner(
        &self,
        tenant_id: &str,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedGrant, AccessError> {
        let kind = token::parse_token_format(presented).ok_or(AccessError::TokenFormatInvalid)?;

        let candidates = self
            .store
            .find_by_lookup(tenant_id, &token::lookup_key(presented))
            .await
            .map_err(AccessError::Storage)?;

        let record = candidates
            .into_iter()
            .find(|c| token::verify_token(presented, &c.token_salt, &c.token_hash))
            .ok_or(AccessError::TokenNotFound)?;

        if record.scope.kind() != kind {
            tracing::error!(
                token_id = %record.id,
                tenant_id = %tenant_id,
                stored_scope = %record.scope.kind(),
                presented_scope = %kind,
                "Access token scope disagrees with its prefix"
            );
            return Err(AccessError::TokenNotFound);
        }

        classify(&record, now)?;

        match self
            .store
            .consume_use(tenant_id, record.id, now)
            .await
            .map_err(AccessError::Storage)?
        {
            Some(updated) => Ok(updated.into()),
            None => {
                // Another request changed the row between read and update.
                let fresh = self
                    .store
                    .find_by_id(tenant_id, record.id)
                    .await
                    .map_err(AccessError::Storage)?
                    .ok_or(AccessError::TokenNotFound)?;
                classify(&fresh, now)?;
                Err(AccessError::TokenExhausted)
            }
        }
    }
}

/// Terminal-state checks in precedence order: revoked, expired, exhausted.
fn classify(record: &AccessToken, now: DateTime<Utc>) -> Result<(), AccessError> {
    if record.is_revoked() {
        return Err(AccessError::TokenRevoked);
    }
    if record.is_expired_at(now) {
        return Err(AccessError::TokenExpired);
    }
    if record.is_exhausted() {
        return Err(AccessError::TokenExhausted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::issuer::{NewAccessToken, TokenIssuer};
    use crate::services::memory::InMemoryStore;
    use chrono::Duration;

    struct Fixture {
        store: Arc<InMemoryStore>,
        issuer: TokenIssuer,
        resolver: TokenResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        Fixture {
            issuer: TokenIssuer::new(store.clone()),
            resolver: TokenResolver::new(store.clone()),
            store,
        }
    }

    fn event_request() -> NewAccessToken {
        NewAccessToken::new(TokenScope::Event {
            event_id: Uuid::new_v4(),
        })
    }

    #[tokio::test]
    async fn test_short_token_rejected_without_lookup() {
        let f = fixture();

        for presented in ["", "E_", "E_1234", "F_0123456789abcdef0"] {
            let err = f.resolver.resolve("tenant-a", presented).await.unwrap_err();
            assert!(matches!(err, AccessError::TokenFormatInvalid));
        }
        assert_eq!(f.store.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_not_found() {
        let f = fixture();
        let presented = token::generate_token(crate::models::ScopeKind::Course);

        let err = f.resolver.resolve("tenant-a", &presented).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenNotFound));
        assert_eq!(f.store.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_revoked_wins_over_expired_and_exhausted() {
        let f = fixture();
        let issued = f
            .issuer
            .issue(
                "tenant-a",
                NewAccessToken {
                    max_uses: Some(1),
                    ..event_request()
                },
            )
            .await
            .unwrap();

        f.store.update_token(issued.record.id, |t| {
            t.revoked_at = Some(Utc::now());
            t.expires_at = Some(Utc::now() - Duration::hours(1));
            t.used_count = 1;
        });

        let err = f.resolver.resolve("tenant-a", &issued.token).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_expired_at_boundary() {
        let f = fixture();
        let expires_at = Utc::now() + Duration::minutes(5);
        let issued = f
            .issuer
            .issue(
                "tenant-a",
                NewAccessToken {
                    expires_at: Some(expires_at),
                    ..event_request()
                },
            )
            .await
            .unwrap();

        let before = f
            .resolver
            .resolve_at("tenant-a", &issued.token, expires_at - Duration::seconds(1))
            .await;
        assert!(before.is_ok());

        let at = f
            .resolver
            .resolve_at("tenant-a", &issued.token, expires_at)
            .await
            .unwrap_err();
        assert!(matches!(at, AccessError::TokenExpired));
    }

    #[tokio::test]
    async fn test_exhausted_after_max_uses() {
        let f = fixture();
        let issued = f
            .issuer
            .issue(
                "tenant-a",
                NewAccessToken {
                    max_uses: Some(2),
                    ..event_request()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            f.resolver.resolve("tenant-a", &issued.token).await.unwrap().used_count,
            1
        );
        assert_eq!(
            f.resolver.resolve("tenant-a", &issued.token).await.unwrap().used_count,
            2
        );
        let err = f.resolver.resolve("tenant-a", &issued.token).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenExhausted));
    }

    #[tokio::test]
    async fn test_token_does_not_resolve_under_other_tenant() {
        let f = fixture();
        let issued = f.issuer.issue("tenant-a", event_request()).await.unwrap();

        let err = f.resolver.resolve("tenant-b", &issued.token).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenNotFound));
    }

    #[tokio::test]
    async fn test_prefix_must_match_stored_scope() {
        let f = fixture();
        let issued = f.issuer.issue("tenant-a", event_request()).await.unwrap();

        // Same hex body presented under a broader-looking prefix.
        let forged = format!("C_{}", &issued.token[2..]);
        let err = f.resolver.resolve("tenant-a", &forged).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenNotFound));
    }

    #[tokio::test]
    async fn test_grant_carries_token_attributes() {
        let f = fixture();
        let scope = TokenScope::Course {
            event_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
        };
        let issued = f
            .issuer
            .issue(
                "tenant-a",
                NewAccessToken {
                    access_level: AccessLevel::Full,
                    can_download: true,
                    ..NewAccessToken::new(scope)
                },
            )
            .await
            .unwrap();

        let grant = f.resolver.resolve("tenant-a", &issued.token).await.unwrap();
        assert_eq!(grant.token_id, issued.record.id);
        assert_eq!(grant.tenant_id, "tenant-a");
        assert_eq!(grant.scope, scope);
        assert_eq!(grant.access_level, AccessLevel::Full);
        assert!(grant.can_download);
        assert_eq!(grant.used_count, 1);
    }
}
