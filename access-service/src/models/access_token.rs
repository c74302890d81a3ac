use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Breadth of a token's authority, carrying exactly the resource references
/// valid for that breadth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum TokenScope {
    /// Whole event.
    Event { event_id: Uuid },
    /// One class within an event.
    Course { event_id: Uuid, course_id: Uuid },
    /// One family/subject within a class.
    Family {
        event_id: Uuid,
        course_id: Uuid,
        subject_id: Uuid,
    },
}

/// Scope column value, as stored and as sent by admin clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Event,
    Course,
    Family,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("unknown scope '{0}'")]
    UnknownScope(String),
    #[error("{scope} scope requires {field}")]
    MissingReference {
        scope: &'static str,
        field: &'static str,
    },
    #[error("{scope} scope must not carry {field}")]
    UnexpectedReference {
        scope: &'static str,
        field: &'static str,
    },
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Event => "event",
            ScopeKind::Course => "course",
            ScopeKind::Family => "family",
        }
    }

    /// Wire prefix of tokens minted for this scope.
    pub fn token_prefix(&self) -> &'static str {
        match self {
            ScopeKind::Event => "E_",
            ScopeKind::Course => "C_",
            ScopeKind::Family => "F_",
        }
    }

    pub fn from_token_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "E_" => Some(ScopeKind::Event),
            "C_" => Some(ScopeKind::Course),
            "F_" => Some(ScopeKind::Family),
            _ => None,
        }
    }
}

impl std::str::FromStr for ScopeKind {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(ScopeKind::Event),
            "course" => Ok(ScopeKind::Course),
            "family" => Ok(ScopeKind::Family),
            other => Err(ScopeError::UnknownScope(other.to_string())),
        }
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TokenScope {
    /// Build a scope from the flat (nullable) column layout.
    ///
    /// This is the single place the scope/resource exclusivity rule lives: it
    /// runs when a token is issued and again whenever a row is loaded.
    pub fn from_parts(
        kind: ScopeKind,
        event_id: Option<Uuid>,
        course_id: Option<Uuid>,
        subject_id: Option<Uuid>,
    ) -> Result<Self, ScopeError> {
        let scope = kind.as_str();
        let event_id = event_id.ok_or(ScopeError::MissingReference {
            scope,
            field: "event_id",
        })?;

        match kind {
            ScopeKind::Event => {
                if course_id.is_some() {
                    return Err(ScopeError::UnexpectedReference {
                        scope,
                        field: "course_id",
                    });
                }
                if subject_id.is_some() {
                    return Err(ScopeError::UnexpectedReference {
                        scope,
                        field: "subject_id",
                    });
                }
                Ok(TokenScope::Event { event_id })
            }
            ScopeKind::Course => {
                let course_id = course_id.ok_or(ScopeError::MissingReference {
                    scope,
                    field: "course_id",
                })?;
                if subject_id.is_some() {
                    return Err(ScopeError::UnexpectedReference {
                        scope,
                        field: "subject_id",
                    });
                }
                Ok(TokenScope::Course {
                    event_id,
                    course_id,
                })
            }
            ScopeKind::Family => {
                let course_id = course_id.ok_or(ScopeError::MissingReference {
                    scope,
                    field: "course_id",
                })?;
                let subject_id = subject_id.ok_or(ScopeError::MissingReference {
                    scope,
                    field: "subject_id",
                })?;
                Ok(TokenScope::Family {
                    event_id,
                    course_id,
                    subject_id,
                })
            }
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            TokenScope::Event { .. } => ScopeKind::Event,
            TokenScope::Course { .. } => ScopeKind::Course,
            TokenScope::Family { .. } => ScopeKind::Family,
        }
    }

    pub fn event_id(&self) -> Uuid {
        match *self {
            TokenScope::Event { event_id }
            | TokenScope::Course { event_id, .. }
            | TokenScope::Family { event_id, .. } => event_id,
        }
    }

    pub fn course_id(&self) -> Option<Uuid> {
        match *self {
            TokenScope::Event { .. } => None,
            TokenScope::Course { course_id, .. } | TokenScope::Family { course_id, .. } => {
                Some(course_id)
            }
        }
    }

    pub fn subject_id(&self) -> Option<Uuid> {
        match *self {
            TokenScope::Family { subject_id, .. } => Some(subject_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Full,
    ReadOnly,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Full => "full",
            AccessLevel::ReadOnly => "read_only",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(AccessLevel::Full),
            "read_only" => Ok(AccessLevel::ReadOnly),
            other => Err(format!("Invalid access level: {}", other)),
        }
    }
}

/// A stored access token. The plaintext token is never part of this record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessToken {
    pub id: Uuid,
    pub tenant_id: String,
    pub scope: TokenScope,
    pub access_level: AccessLevel,
    pub can_download: bool,
    /// Truncated SHA-256 of the token, used only to narrow the lookup.
    #[serde(skip_serializing)]
    pub token_lookup: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    #[serde(skip_serializing)]
    pub token_salt: String,
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub metadata: serde_json::Value,
}

impl AccessToken {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.used_count >= max)
    }
}

/// Flat row layout of the `access_tokens` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccessTokenRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub scope: String,
    pub event_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub access_level: String,
    pub can_download: bool,
    pub token_lookup: String,
    pub token_hash: String,
    pub token_salt: String,
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub metadata: serde_json::Value,
}

impl TryFrom<AccessTokenRow> for AccessToken {
    type Error = anyhow::Error;

    fn try_from(row: AccessTokenRow) -> Result<Self, Self::Error> {
        let kind: ScopeKind = row.scope.parse()?;
        let scope = TokenScope::from_parts(kind, row.event_id, row.course_id, row.subject_id)?;
        let access_level = row
            .access_level
            .parse::<AccessLevel>()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(AccessToken {
            id: row.id,
            tenant_id: row.tenant_id,
            scope,
            access_level,
            can_download: row.can_download,
            token_lookup: row.token_lookup,
            token_hash: row.token_hash,
            token_salt: row.token_salt,
            max_uses: row.max_uses,
            used_count: row.used_count,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
            created_by: row.created_by,
            metadata: row.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_event_scope_requires_only_event() {
        let (event, course, _) = ids();

        let scope = TokenScope::from_parts(ScopeKind::Event, Some(event), None, None).unwrap();
        assert_eq!(scope, TokenScope::Event { event_id: event });

        assert_eq!(
            TokenScope::from_parts(ScopeKind::Event, Some(event), Some(course), None),
            Err(ScopeError::UnexpectedReference {
                scope: "event",
                field: "course_id"
            })
        );
    }

    #[test]
    fn test_course_scope_rejects_subject() {
        let (event, course, subject) = ids();

        assert!(TokenScope::from_parts(ScopeKind::Course, Some(event), Some(course), None).is_ok());
        assert!(
            TokenScope::from_parts(ScopeKind::Course, Some(event), Some(course), Some(subject))
                .is_err()
        );
        assert!(TokenScope::from_parts(ScopeKind::Course, Some(event), None, None).is_err());
    }

    #[test]
    fn test_family_scope_without_subject_is_rejected() {
        let (event, course, _) = ids();

        assert_eq!(
            TokenScope::from_parts(ScopeKind::Family, Some(event), Some(course), None),
            Err(ScopeError::MissingReference {
                scope: "family",
                field: "subject_id"
            })
        );
    }

    #[test]
    fn test_missing_event_is_rejected_for_every_scope() {
        for kind in [ScopeKind::Event, ScopeKind::Course, ScopeKind::Family] {
            assert!(TokenScope::from_parts(kind, None, None, None).is_err());
        }
    }

    #[test]
    fn test_prefix_round_trip() {
        for kind in [ScopeKind::Event, ScopeKind::Course, ScopeKind::Family] {
            assert_eq!(ScopeKind::from_token_prefix(kind.token_prefix()), Some(kind));
        }
        assert_eq!(ScopeKind::from_token_prefix("X_"), None);
    }

    #[test]
    fn test_row_with_broken_scope_fails_conversion() {
        let row = AccessTokenRow {
            id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            scope: "family".to_string(),
            event_id: Some(Uuid::new_v4()),
            course_id: Some(Uuid::new_v4()),
            subject_id: None,
            access_level: "full".to_string(),
            can_download: true,
            token_lookup: "0".repeat(16),
            token_hash: "0".repeat(64),
            token_salt: "0".repeat(32),
            max_uses: None,
            used_count: 0,
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
            created_at: Utc::now(),
            created_by: None,
            metadata: serde_json::json!({}),
        };

        assert!(AccessToken::try_from(row).is_err());
    }
}
