pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod iap;
pub mod middleware;
pub mod provisioning;
pub mod store;
