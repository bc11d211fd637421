pub mod acme;
pub mod cert;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lock;
pub mod manager;
pub mod store;
pub mod time;

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
