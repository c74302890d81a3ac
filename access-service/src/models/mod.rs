pub mod access_log;
pub mod access_token;
pub mod asset;

pub use access_log::{AccessAction, AccessLog};
pub use access_token::{
    AccessLevel, AccessToken, AccessTokenRow, ScopeError, ScopeKind, TokenScope,
};
pub use asset::AssetRecord;
