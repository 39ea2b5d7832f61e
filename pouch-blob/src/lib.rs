//! # pouch-blob: resumable upload staging and durable object storage
//!
//! `pouch-blob` owns the upload half of the Pouch pipeline:
//!
//! - a **staging store** that accumulates bytes for in-flight upload
//!   sessions, addressed by `(file name, token)`
//! - a **durable object store** abstraction (memory and filesystem
//!   backends) with presigned read URLs
//! - the **upload gateway** protocol state machine:
//!   handshake → append* → finalize, with idempotent delete and an
//!   outbox that guarantees a finalized upload's completion event is
//!   never lost
//! - a **session sweeper** that reclaims abandoned sessions
//!
//! Storage is trait-based so services wire in whichever backend fits;
//! the gateway itself never touches a filesystem path or a bucket name
//! directly, only the `StagingStore`/`ObjectStore` seams.

pub mod config;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod sessions;
pub mod staging;
pub mod store;
pub mod sweeper;
mod types;

pub use config::BlobConfig;
pub use error::{BlobError, BlobResult};
pub use gateway::{CompletionSink, UploadGateway};
pub use keys::{sanitize_file_name, DefaultKeyStrategy, KeyStrategy, UPLOADS_BUCKET};
pub use sessions::{MemorySessionStore, SessionStore};
pub use staging::{FsStagingStore, MemoryStagingStore, StagingStore};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore, PresignedUrl};
pub use sweeper::{SessionSweeper, SweeperHandle};
pub use types::{
    AssetType, CompletionEvent, PrincipalId, SessionKey, SessionState, UploadSession, UploadToken,
};
