// api-access - library root

pub mod access_method;
pub mod address_cache;
pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod task;
pub mod tester;
pub mod transport;
