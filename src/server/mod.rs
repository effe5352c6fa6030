//! Transport: plain and TLS listeners feeding the proxy

pub mod http;
pub mod tls;

pub use http::{run, AppState};
