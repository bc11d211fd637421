//! Low-level ACME v1 client implementation.
//!
//! This module maps the legacy (pre-RFC 8555) ACME protocol spoken by the Let's Encrypt v1 endpoints
//! to asynchronous Rust functions: registration, authorization, HTTP-01 challenges and certificate
//! download. It holds no issuance policy of its own; [`crate::manager`] builds the issuance flow on
//! top of it.

pub mod client;
pub mod error;
pub mod http;
pub mod object;
pub mod poll;
