//! In-process implementations of the store traits.
//!
//! Used by tests and single-node development. Token mutation goes through
//! DashMap's per-entry write lock, which gives `consume_use` the same
//! all-or-nothing behaviour as the conditional UPDATE in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::store::{AccessLogSink, AssetCatalog, TokenStore};
use crate::models::{AccessLog, AccessToken, AssetRecord};

pub struct InMemoryStore {
    tokens: DashMap<Uuid, AccessToken>,
    assets: DashMap<Uuid, AssetRecord>,
    logs: Mutex<Vec<AccessLog>>,
    lookups: AtomicUsize,
    fail_log_appends: AtomicBool,
    fail_asset_lookups: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            assets: DashMap::new(),
            logs: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
            fail_log_appends: AtomicBool::new(false),
            fail_asset_lookups: AtomicBool::new(false),
        }
    }

    pub fn insert_asset(&self, asset: AssetRecord) {
        self.assets.insert(asset.id, asset);
    }

    /// Number of token lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Snapshot of the audit trail in append order.
    pub fn logs(&self) -> Vec<AccessLog> {
        self.logs
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }

    pub fn token(&self, token_id: Uuid) -> Option<AccessToken> {
        self.tokens.get(&token_id).map(|entry| entry.value().clone())
    }

    /// Direct mutable access for tests that need to age or revoke a token.
    pub fn update_token<F>(&self, token_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut AccessToken),
    {
        match self.tokens.get_mut(&token_id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn set_fail_log_appends(&self, fail: bool) {
        self.fail_log_appends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_asset_lookups(&self, fail: bool) {
        self.fail_asset_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn insert_token(&self, token: &AccessToken) -> Result<(), anyhow::Error> {
        if self.tokens.contains_key(&token.id) {
            return Err(anyhow::anyhow!("Duplicate access token id {}", token.id));
        }
        self.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_by_lookup(
        &self,
        tenant_id: &str,
        token_lookup: &str,
    ) -> Result<Vec<AccessToken>, anyhow::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tokens
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.token_lookup == token_lookup)
            .map(|t| t.value().clone())
            .collect())
    }

    async fn find_by_id(
        &self,
        tenant_id: &str,
        token_id: Uuid,
    ) -> Result<Option<AccessToken>, anyhow::Error> {
        Ok(self
            .tokens
            .get(&token_id)
            .filter(|t| t.tenant_id == tenant_id)
            .map(|t| t.value().clone()))
    }

    async fn consume_use(
        &self,
        tenant_id: &str,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, anyhow::Error> {
        let Some(mut entry) = self.tokens.get_mut(&token_id) else {
            return Ok(None);
        };
        let token = entry.value_mut();

        if token.tenant_id != tenant_id
            || token.is_revoked()
            || token.is_expired_at(now)
            || token.is_exhausted()
        {
            return Ok(None);
        }

        token.used_count += 1;
        token.last_used_at = Some(now);
        Ok(Some(token.clone()))
    }

    async fn revoke(
        &self,
        tenant_id: &str,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, anyhow::Error> {
        let Some(mut entry) = self.tokens.get_mut(&token_id) else {
            return Ok(None);
        };
        let token = entry.value_mut();
        if token.tenant_id != tenant_id {
            return Ok(None);
        }
        if token.revoked_at.is_none() {
            token.revoked_at = Some(now);
        }
        Ok(Some(token.clone()))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[async_trait]
impl AccessLogSink for InMemoryStore {
    async fn append(&self, entry: &AccessLog) -> Result<(), anyhow::Error> {
        if self.fail_log_appends.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("access log sink unavailable"));
        }
        self.logs
            .lock()
            .map_err(|e| anyhow::anyhow!("Access log mutex poisoned: {}", e))?
            .push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl AssetCatalog for InMemoryStore {
    async fn find_asset(
        &self,
        tenant_id: &str,
        asset_id: Uuid,
    ) -> Result<Option<AssetRecord>, anyhow::Error> {
        if self.fail_asset_lookups.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("asset catalog unavailable"));
        }
        Ok(self
            .assets
            .get(&asset_id)
            .filter(|a| a.tenant_id == tenant_id)
            .map(|a| a.value().clone()))
    }
}
