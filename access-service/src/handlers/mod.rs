pub mod access;
pub mod admin;
pub mod health;
pub mod metrics;
