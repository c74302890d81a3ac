pub mod client_ip;
pub mod signature;

pub use client_ip::client_ip;
pub use signature::{generate_asset_signature, validate_asset_signature, SignatureError};
