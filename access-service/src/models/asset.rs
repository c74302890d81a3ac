use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenScope;

/// Read-only projection of a photo asset produced by the upload pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub event_id: Uuid,
    pub course_id: Option<Uuid>,
    /// Subjects (children) explicitly tagged on this asset.
    pub subject_ids: Vec<Uuid>,
    pub storage_key: String,
}

impl AssetRecord {
    /// Whether this asset lies inside the resource chain of `scope`.
    pub fn within(&self, scope: &TokenScope) -> bool {
        match *scope {
            TokenScope::Event { event_id } => self.event_id == event_id,
            TokenScope::Course {
                event_id,
                course_id,
            } => self.event_id == event_id && self.course_id == Some(course_id),
            TokenScope::Family {
                event_id,
                subject_id,
                ..
            } => self.event_id == event_id && self.subject_ids.contains(&subject_id),
        }
    }
}
