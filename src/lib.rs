// Session Gateway - Library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod session;
