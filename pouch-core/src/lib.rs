//! Shared building blocks for the Pouch upload pipeline.
//!
//! `pouch-core` stays deliberately small: a structured error type that can
//! travel through `anyhow::Error` until the transport layer decides how to
//! serialize it, and a string key/value configuration store with typed
//! snapshot getters.

pub mod config;
pub mod errors;

pub use config::{PouchConfig, PouchConfigSnapshot};
pub use errors::{ErrorKind, PouchError, PouchResult};
