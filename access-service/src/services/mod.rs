pub mod audit;
pub mod database;
pub mod error;
pub mod issuer;
pub mod memory;
pub mod metrics;
pub mod rate_limit;
pub mod resolver;
pub mod signed_url;
pub mod store;
pub mod tenant;
pub mod token;

pub use audit::AccessAuditLogger;
pub use database::Database;
pub use error::AccessError;
pub use issuer::{IssuedToken, NewAccessToken, TokenIssuer};
pub use memory::InMemoryStore;
pub use rate_limit::{
    ActionClass, LocalCounterStore, Quota, RateDecision, RateIdentity, RateLimitStatus,
    RateLimitStore, RateLimiter, RedisCounterStore,
};
pub use resolver::{ResolvedGrant, TokenResolver};
pub use signed_url::{HotlinkGuard, RequestContext, SignedUrl, SignedUrlIssuer, UrlIntent};
pub use store::{AccessLogSink, AssetCatalog, TokenStore};
pub use tenant::{TenantDomainMap, TenantResolution, TenantResolver, TenantSource};
