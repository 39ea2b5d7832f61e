use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pouch_blob::AssetType;
use pouch_core::errors::{PouchError, PouchResult};

/// The slice of a user profile the completion pipeline touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub avatar_url: Option<String>,
    pub cover_image_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            avatar_url: None,
            cover_image_url: None,
        }
    }
}

/// System-of-record access for user profiles. Asset updates are plain
/// overwrites, so redelivered completion jobs converge on the same row.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> PouchResult<UserProfile>;

    /// Overwrite the user's asset path for the given asset type.
    async fn set_asset_url(
        &self,
        user_id: &str,
        asset_type: AssetType,
        url: String,
    ) -> PouchResult<()>;
}

/// In-memory repository for development and tests.
pub struct MemoryUserRepository {
    users: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(&self, profile: UserProfile) {
        self.users.write().insert(profile.id.clone(), profile);
    }
}

impl Default for MemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get(&self, user_id: &str) -> PouchResult<UserProfile> {
        self.users
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| PouchError::not_found(format!("No record found for id '{}'", user_id)).into_anyhow())
    }

    async fn set_asset_url(
        &self,
        user_id: &str,
        asset_type: AssetType,
        url: String,
    ) -> PouchResult<()> {
        let mut users = self.users.write();
        let profile = users.get_mut(user_id).ok_or_else(|| {
            PouchError::not_found(format!("No record found for id '{}'", user_id)).into_anyhow()
        })?;

        match asset_type {
            AssetType::Avatar => profile.avatar_url = Some(url),
            AssetType::CoverImage => profile.cover_image_url = Some(url),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_asset_url_overwrites() {
        let repo = MemoryUserRepository::new();
        repo.insert(UserProfile::new("u-1"));

        repo.set_asset_url("u-1", AssetType::Avatar, "avatars/a".to_string())
            .await
            .unwrap();
        repo.set_asset_url("u-1", AssetType::Avatar, "avatars/b".to_string())
            .await
            .unwrap();

        let profile = repo.get("u-1").await.unwrap();
        assert_eq!(profile.avatar_url.as_deref(), Some("avatars/b"));
        assert!(profile.cover_image_url.is_none());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let repo = MemoryUserRepository::new();
        let err = repo
            .set_asset_url("ghost", AssetType::Avatar, "x".to_string())
            .await
            .unwrap_err();
        let pouch = PouchError::from_anyhow(&err).unwrap();
        assert_eq!(pouch.code(), 404);
    }
}
