pub mod admin;
pub mod context;

pub use admin::admin_auth_middleware;
pub use context::AccessContext;
