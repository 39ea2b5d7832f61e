//! # pouch-server: the HTTP face of the upload pipeline
//!
//! Wires the upload gateway, the durable job queue, and the completion
//! workers into one service:
//!
//! - `POST /upload/handshake` opens a session and returns its token
//! - `POST /upload/append` streams a chunk into the session
//! - `GET /upload/status` reports bytes persisted so far
//! - `DELETE /upload/delete` abandons a session
//! - `POST /upload/finalize` moves the staged bytes to durable storage
//!   and enqueues the completion job
//!
//! Completion jobs run out-of-band: they stamp the finished asset's
//! path onto the owning user and refresh the onboarding cache with a
//! presigned URL, best effort.

pub mod cache;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod sink;
pub mod state;
pub mod users;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
