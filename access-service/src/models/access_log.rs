use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of access attempt recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    ListFolders,
    ListAssets,
    View,
    Download,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::ListFolders => "list_folders",
            AccessAction::ListAssets => "list_assets",
            AccessAction::View => "view",
            AccessAction::Download => "download",
        }
    }
}

/// One append-only audit record per resolution or action attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLog {
    pub id: Uuid,
    pub tenant_id: String,
    /// Absent when the presented token was malformed or unknown.
    pub access_token_id: Option<Uuid>,
    /// Masked token prefix for operator triage; never the raw token.
    pub token_mask: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub path: String,
    pub action: AccessAction,
    pub ok: bool,
    pub response_time_ms: i64,
    pub notes: Option<String>,
}

impl AccessLog {
    pub fn new(tenant_id: String, path: String, action: AccessAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            access_token_id: None,
            token_mask: None,
            occurred_at: Utc::now(),
            ip: None,
            user_agent: None,
            path,
            action,
            ok: false,
            response_time_ms: 0,
            notes: None,
        }
    }

    pub fn with_token(mut self, token_mask: Option<String>, token_id: Option<Uuid>) -> Self {
        self.token_mask = token_mask;
        self.access_token_id = token_id;
        self
    }

    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }

    /// Stamp the outcome. `notes` carries the rejection code on failure.
    pub fn finish(mut self, ok: bool, notes: Option<String>, elapsed: std::time::Duration) -> Self {
        self.ok = ok;
        self.notes = notes;
        self.response_time_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder_fills_outcome() {
        let id = Uuid::new_v4();
        let log = AccessLog::new("tenant-a".into(), "/access/E_ab…".into(), AccessAction::View)
            .with_token(Some("E_ab12…".into()), Some(id))
            .with_client(Some("203.0.113.7".into()), None)
            .finish(false, Some("token_expired".into()), Duration::from_millis(12));

        assert_eq!(log.access_token_id, Some(id));
        assert_eq!(log.token_mask.as_deref(), Some("E_ab12…"));
        assert_eq!(log.ip.as_deref(), Some("203.0.113.7"));
        assert!(!log.ok);
        assert_eq!(log.notes.as_deref(), Some("token_expired"));
        assert_eq!(log.response_time_ms, 12);
        assert_eq!(AccessAction::ListFolders.as_str(), "list_folders");
    }
}
