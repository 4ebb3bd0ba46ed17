//! cachegate: a caching reverse proxy.
//!
//! Requests are forwarded to a single origin. Responses are stored in memory
//! according to their `Cache-Control` header and per-route `cache_valid`
//! defaults, and every proxied response reports `X-Cache-Status`
//! (`HIT`, `MISS` or `EXPIRED`).

pub mod cache;
pub mod config;
pub mod error;
pub mod origin;
pub mod proxy;

pub use error::{GateError, Result};
