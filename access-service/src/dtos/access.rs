use serde::{Deserialize, Serialize};

use crate::services::{ResolvedGrant, SignedUrl};

#[derive(Debug, Default, Deserialize)]
pub struct AssetUrlQuery {
    /// Token fallback for clients that cannot set headers.
    pub token: Option<String>,
    #[serde(default)]
    pub download: bool,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    #[serde(flatten)]
    pub grant: ResolvedGrant,
    pub remaining_uses: Option<i64>,
}

impl From<ResolvedGrant> for GrantResponse {
    fn from(grant: ResolvedGrant) -> Self {
        let remaining_uses = grant.max_uses.map(|max| (max - grant.used_count).max(0));
        Self {
            grant,
            remaining_uses,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    #[serde(flatten)]
    pub signed: SignedUrl,
}
