//! Shared utilities

pub mod human_format;
pub mod http_client;

pub use http_client::HttpClientFactory;
