use crate::types::SessionKey;

/// Prefix holding staged, not-yet-finalized bytes.
pub const UPLOADS_BUCKET: &str = "uploads";

/// Strip a client-supplied file name down to a single safe path
/// component: the final segment only, with anything outside
/// `[A-Za-z0-9._-]` replaced and leading dots removed.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    cleaned.trim_start_matches('.').to_string()
}

/// Strategy for deriving storage keys from session identity.
pub trait KeyStrategy: Send + Sync {
    /// Key of the mutable staged blob for an open session.
    fn staging_key(&self, key: &SessionKey) -> String;

    /// Canonical key of the durable object produced by finalize.
    fn object_key(&self, key: &SessionKey) -> String;
}

/// Default strategy: token-scoped keys, so two uploads of the same file
/// name never collide and the durable path stays deterministic per
/// session.
#[derive(Debug, Clone)]
pub struct DefaultKeyStrategy;

impl KeyStrategy for DefaultKeyStrategy {
    fn staging_key(&self, key: &SessionKey) -> String {
        format!("{}/{}/{}", UPLOADS_BUCKET, key.token, key.file_name)
    }

    fn object_key(&self, key: &SessionKey) -> String {
        format!("{}/{}", key.token, key.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UploadToken;

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_file_name("photo.png"), "photo.png");
        assert_eq!(sanitize_file_name("my photo (1).png"), "my_photo__1_.png");
        assert_eq!(sanitize_file_name("...hidden"), "hidden");
    }

    #[test]
    fn sanitize_can_leave_nothing() {
        assert_eq!(sanitize_file_name(""), "");
        assert_eq!(sanitize_file_name("/"), "");
        assert_eq!(sanitize_file_name(".."), "");
    }

    #[test]
    fn keys_are_deterministic_per_session() {
        let key = SessionKey::new(
            "photo.png".to_string(),
            UploadToken::from_string("tok123".to_string()),
        );
        let strategy = DefaultKeyStrategy;
        assert_eq!(
            strategy.staging_key(&key),
            format!("{}/tok123/photo.png", UPLOADS_BUCKET)
        );
        assert_eq!(strategy.object_key(&key), "tok123/photo.png");
    }
}
