//! Fixed-window request throttling per (identity, action class).
//!
//! Every call increments `rl:{class}:{identity}:{window_index}` once; the
//! call is throttled when the post-increment count exceeds the class limit.
//! Counter storage is pluggable so replicas can share state through Redis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::{QuotaConfig, RateLimitConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    GalleryFetch,
    SignedUrl,
    Checkout,
    Webhook,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::GalleryFetch => "gallery_fetch",
            ActionClass::SignedUrl => "signed_url",
            ActionClass::Checkout => "checkout",
            ActionClass::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

impl From<QuotaConfig> for Quota {
    fn from(config: QuotaConfig) -> Self {
        Self {
            limit: config.limit,
            window: config.window(),
        }
    }
}

/// Who is being counted: the token when one resolved, else the caller address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateIdentity {
    Token(Uuid),
    Address(IpAddr),
}

impl fmt::Display for RateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateIdentity::Token(id) => write!(f, "token:{}", id),
            RateIdentity::Address(ip) => write!(f, "ip:{}", ip),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32, limit: u32 },
    /// `retry_after` is `None` when the counter store could not be reached.
    Throttled {
        retry_after: Option<Duration>,
        limit: u32,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Current window of one (identity, class) pair.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub class: ActionClass,
    pub count: u64,
    pub limit: u32,
    pub blocked: bool,
    pub window_start: DateTime<Utc>,
    pub resets_in_seconds: u64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically add one to `key` and return the new count. A freshly
    /// created key lives at least `ttl`.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, anyhow::Error>;

    async fn get(&self, key: &str) -> Result<u64, anyhow::Error>;
}

struct LocalCounter {
    count: u64,
    expires_at: Instant,
}

/// Process-local counters. Correct for a single replica only.
#[derive(Default)]
pub struct LocalCounterStore {
    counters: DashMap<String, LocalCounter>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows that have run out. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        before.saturating_sub(self.counters.len())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for LocalCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, anyhow::Error> {
        let now = Instant::now();
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| LocalCounter {
                count: 0,
                expires_at: now + ttl,
            });

        if counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now + ttl;
        }
        counter.count += 1;
        Ok(counter.count)
    }

    async fn get(&self, key: &str) -> Result<u64, anyhow::Error> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.count)
            .unwrap_or(0))
    }
}

/// Counters shared by every replica through Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis for rate limit counters");
        let client = redis::Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[async_trait]
impl RateLimitStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl_secs = ttl.as_secs().max(1);

        // MULTI / INCR / EXPIRE / EXEC in a single round trip.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment rate limit counter: {}", e))?;

        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let count: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read rate limit counter: {}", e))?;
        Ok(count.unwrap_or(0))
    }
}

/// Window boundaries for one quota at one instant, in unix milliseconds.
struct Window {
    index: i64,
    start_ms: i64,
    end_ms: i64,
}

impl Window {
    fn at(quota: &Quota, now: DateTime<Utc>) -> Self {
        let window_ms = i64::try_from(quota.window.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);
        let now_ms = now.timestamp_millis();
        let index = now_ms.div_euclid(window_ms);
        let start_ms = index * window_ms;
        Self {
            index,
            start_ms,
            end_ms: start_ms + window_ms,
        }
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let ms = (self.end_ms - now.timestamp_millis()).max(0);
        Duration::from_millis(u64::try_from(ms).unwrap_or(0))
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    gallery: Quota,
    signed_url: Quota,
    checkout: Quota,
    webhook: Quota,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            gallery: config.gallery.into(),
            signed_url: config.signed_url.into(),
            checkout: config.checkout.into(),
            webhook: config.webhook.into(),
        }
    }

    pub fn quota(&self, class: ActionClass) -> Quota {
        match class {
            ActionClass::GalleryFetch => self.gallery,
            ActionClass::SignedUrl => self.signed_url,
            ActionClass::Checkout => self.checkout,
            ActionClass::Webhook => self.webhook,
        }
    }

    fn key(class: ActionClass, identity: &RateIdentity, window: &Window) -> String {
        format!("rl:{}:{}:{}", class.as_str(), identity, window.index)
    }

    pub async fn check(&self, identity: &RateIdentity, class: ActionClass) -> RateDecision {
        self.check_at(identity, class, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        identity: &RateIdentity,
        class: ActionClass,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let quota = self.quota(class);
        let window = Window::at(&quota, now);
        let key = Self::key(class, identity, &window);

        let count = match self.store.increment(&key, quota.window).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    class = class.as_str(),
                    error = %e,
                    "Rate limit store unavailable, rejecting request"
                );
                metrics::counter!("rate_limit_store_errors_total", "class" => class.as_str())
                    .increment(1);
                return RateDecision::Throttled {
                    retry_after: None,
                    limit: quota.limit,
                };
            }
        };

        if count > u64::from(quota.limit) {
            tracing::warn!(
                class = class.as_str(),
                identity = %identity,
                count,
                limit = quota.limit,
                "Rate limit exceeded"
            );
            metrics::counter!("rate_limit_throttled_total", "class" => class.as_str())
                .increment(1);
            RateDecision::Throttled {
                retry_after: Some(window.remaining(now)),
                limit: quota.limit,
            }
        } else {
            RateDecision::Allowed {
                remaining: quota.limit - u32::try_from(count).unwrap_or(quota.limit),
                limit: quota.limit,
            }
        }
    }

    /// Inspect the current window without counting a request.
    pub async fn status(
        &self,
        identity: &RateIdentity,
        class: ActionClass,
    ) -> Result<RateLimitStatus, anyhow::Error> {
        let now = Utc::now();
        let quota = self.quota(class);
        let window = Window::at(&quota, now);
        let count = self.store.get(&Self::key(class, identity, &window)).await?;

        Ok(RateLimitStatus {
            class,
            count,
            limit: quota.limit,
            blocked: count > u64::from(quota.limit),
            window_start: DateTime::from_timestamp_millis(window.start_ms).unwrap_or(now),
            resets_in_seconds: window.remaining(now).as_secs(),
        })
    }
}
