//! Minting and revoking access tokens.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AccessError;
use super::store::TokenStore;
use super::token;
use crate::models::{AccessLevel, AccessToken, ScopeKind, TokenScope};

/// Everything needed to mint one token.
///
/// Resource references arrive in the flat, nullable shape admin clients send;
/// `TokenScope::from_parts` decides whether the combination is legal.
#[derive(Debug, Clone)]
pub struct NewAccessToken {
    pub scope: ScopeKind,
    pub event_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub access_level: AccessLevel,
    pub can_download: bool,
    pub max_uses: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewAccessToken {
    pub fn new(scope: TokenScope) -> Self {
        Self {
            scope: scope.kind(),
            event_id: Some(scope.event_id()),
            course_id: scope.course_id(),
            subject_id: scope.subject_id(),
            access_level: AccessLevel::ReadOnly,
            can_download: false,
            max_uses: None,
            expires_at: None,
            created_by: None,
            metadata: serde_json::json!({}),
        }
    }
}

/// Result of issuance. `token` is the only copy of the plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub record: AccessToken,
}

#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<dyn TokenStore>,
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    pub async fn issue(
        &self,
        tenant_id: &str,
        request: NewAccessToken,
    ) -> Result<IssuedToken, AccessError> {
        let scope = TokenScope::from_parts(
            request.scope,
            request.event_id,
            request.course_id,
            request.subject_id,
        )?;

        if let Some(max_uses) = request.max_uses.filter(|&max| max < 1) {
            return Err(AccessError::InvalidUseLimit(max_uses));
        }

        let plaintext = token::generate_token(scope.kind());
        let salt = token::generate_salt();

        let record = AccessToken {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            scope,
            access_level: request.access_level,
            can_download: request.can_download,
            token_lookup: token::lookup_key(&plaintext),
            token_hash: token::hash_token(&plaintext, &salt),
            token_salt: salt,
            max_uses: request.max_uses,
            used_count: 0,
            expires_at: request.expires_at,
            revoked_at: None,
            last_used_at: None,
            created_at: Utc::now(),
            created_by: request.created_by,
            metadata: request.metadata,
        };

        self.store
            .insert_token(&record)
            .await
            .map_err(AccessError::Storage)?;

        tracing::info!(
            token_id = %record.id,
            tenant_id = %record.tenant_id,
            scope = %record.scope.kind(),
            token_mask = %token::mask_token(&plaintext),
            "Access token issued"
        );
        metrics::counter!("access_tokens_issued_total", "scope" => record.scope.kind().as_str())
            .increment(1);

        Ok(IssuedToken {
            token: plaintext,
            record,
        })
    }

    /// Mark a token revoked. Idempotent: the first revocation time is kept.
    pub async fn revoke(&self, tenant_id: &str, token_id: Uuid) -> Result<AccessToken, AccessError> {
        let record = self
            .store
            .revoke(tenant_id, token_id, Utc::now())
            .await
            .map_err(AccessError::Storage)?
            .ok_or(AccessError::TokenNotFound)?;

        tracing::info!(token_id = %record.id, tenant_id = %tenant_id, "Access token revoked");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScopeError;
    use crate::services::memory::InMemoryStore;

    fn issuer() -> (Arc<InMemoryStore>, TokenIssuer) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), TokenIssuer::new(store))
    }

    #[tokio::test]
    async fn test_issue_persists_only_hash() {
        let (store, issuer) = issuer();
        let scope = TokenScope::Event {
            event_id: Uuid::new_v4(),
        };

        let issued = issuer
            .issue("tenant-a", NewAccessToken::new(scope))
            .await
            .unwrap();

        assert!(issued.token.starts_with("E_"));
        let stored = store
            .find_by_id("tenant-a", issued.record.id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.token_hash, issued.token);
        assert!(!stored.token_hash.contains(&issued.token[2..]));
        assert!(token::verify_token(
            &issued.token,
            &stored.token_salt,
            &stored.token_hash
        ));
        assert_eq!(stored.used_count, 0);
    }

    #[tokio::test]
    async fn test_family_without_subject_rejected_at_creation() {
        let (_, issuer) = issuer();
        let request = NewAccessToken {
            subject_id: None,
            ..NewAccessToken::new(TokenScope::Family {
                event_id: Uuid::new_v4(),
                course_id: Uuid::new_v4(),
                subject_id: Uuid::new_v4(),
            })
        };

        let err = issuer.issue("tenant-a", request).await.unwrap_err();
        assert!(matches!(
            err,
            AccessError::InvalidScope(ScopeError::MissingReference {
                field: "subject_id",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_non_positive_use_limit_rejected() {
        let (_, issuer) = issuer();
        let scope = TokenScope::Event {
            event_id: Uuid::new_v4(),
        };

        for max_uses in [0, -3] {
            let request = NewAccessToken {
                max_uses: Some(max_uses),
                ..NewAccessToken::new(scope)
            };
            let err = issuer.issue("tenant-a", request).await.unwrap_err();
            assert!(matches!(err, AccessError::InvalidUseLimit(m) if m == max_uses));
            assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        }

        let single = NewAccessToken {
            max_uses: Some(1),
            ..NewAccessToken::new(scope)
        };
        assert!(issuer.issue("tenant-a", single).await.is_ok());
    }

    #[tokio::test]
    async fn test_event_with_course_rejected() {
        let (_, issuer) = issuer();
        let request = NewAccessToken {
            course_id: Some(Uuid::new_v4()),
            ..NewAccessToken::new(TokenScope::Event {
                event_id: Uuid::new_v4(),
            })
        };

        let err = issuer.issue("tenant-a", request).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidScope(_)));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (_, issuer) = issuer();
        let issued = issuer
            .issue(
                "tenant-a",
                NewAccessToken::new(TokenScope::Event {
                    event_id: Uuid::new_v4(),
                }),
            )
            .await
            .unwrap();

        let first = issuer.revoke("tenant-a", issued.record.id).await.unwrap();
        let second = issuer.revoke("tenant-a", issued.record.id).await.unwrap();
        assert!(first.revoked_at.is_some());
        assert_eq!(first.revoked_at, second.revoked_at);

        let other_tenant = issuer.revoke("tenant-b", issued.record.id).await;
        assert!(matches!(other_tenant, Err(AccessError::TokenNotFound)));
    }
}
