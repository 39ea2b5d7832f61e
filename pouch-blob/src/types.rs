use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Trusted user identifier supplied by the upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unguessable session token binding append/status/delete/finalize calls
/// to one upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadToken(pub String);

impl UploadToken {
    /// Generate a fresh token: 32 bytes from the OS CSPRNG, URL-safe
    /// base64 so it survives query strings untouched.
    pub fn generate() -> Self {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        Self(URL_SAFE_NO_PAD.encode(raw))
    }

    pub fn from_string(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of one upload session: sanitized file name plus token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub file_name: String,
    pub token: UploadToken,
}

impl SessionKey {
    pub fn new(file_name: String, token: UploadToken) -> Self {
        Self { file_name, token }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.token, self.file_name)
    }
}

/// Lifecycle of an upload session. `Complete` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Open,
    Complete,
    Deleted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Complete => "complete",
            Self::Deleted => "deleted",
        }
    }
}

/// Explicit session record. The byte offset is tracked here rather than
/// inferred from staged-file size, so a status read never races a writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub key: SessionKey,
    pub owner: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub bytes_received: u64,
    pub state: SessionState,
    /// Canonical object key recorded at finalize; lets a repeated
    /// finalize answer without a second durable write.
    pub durable_path: Option<String>,
}

impl UploadSession {
    pub fn open(key: SessionKey, owner: PrincipalId) -> Self {
        let now = Utc::now();
        Self {
            key,
            owner,
            created_at: now,
            updated_at: now,
            bytes_received: 0,
            state: SessionState::Open,
            durable_path: None,
        }
    }

    /// Record appended bytes. Total is monotonically non-decreasing.
    pub fn record_append(&mut self, new_total: u64) {
        debug_assert!(new_total >= self.bytes_received);
        self.bytes_received = new_total;
        self.updated_at = Utc::now();
    }

    pub fn mark_complete(&mut self, durable_path: String) {
        self.state = SessionState::Complete;
        self.durable_path = Some(durable_path);
        self.updated_at = Utc::now();
    }

    pub fn mark_deleted(&mut self) {
        self.state = SessionState::Deleted;
        self.updated_at = Utc::now();
    }
}

/// Which user attribute a finished upload lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Avatar,
    CoverImage,
}

impl AssetType {
    /// Durable bucket for this asset family.
    pub fn bucket(&self) -> &'static str {
        match self {
            Self::Avatar => "avatars",
            Self::CoverImage => "backgrounds",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::CoverImage => "cover_image",
        }
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avatar" => Ok(Self::Avatar),
            "cover_image" => Ok(Self::CoverImage),
            other => Err(format!("Unknown asset type: {}", other)),
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message published when a finalized upload must be reflected in the
/// system of record. Delivered at least once; consumers overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub user_id: String,
    pub asset_type: AssetType,
    pub path: String,
}
