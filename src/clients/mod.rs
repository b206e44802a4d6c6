//! Clients for validating against the owning service directly.

pub mod http;

pub use http::HttpEntityValidator;
