use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use ripple_types::api::ContentType;

use crate::error::ApiError;

/// An accepted upload: durable URL plus its media classification.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub url: String,
    pub content_type: ContentType,
}

/// Media-upload collaborator: writes uploaded bytes to a local directory
/// served read-only at `/media`, classifying by declared MIME type. A
/// failed write is an upstream error and aborts the calling operation —
/// never a silent empty URL.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating media dir {}", dir.display()))?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// image/* -> Image, video/* -> Video, anything else unsupported.
    pub fn classify(mime: &str) -> Option<ContentType> {
        if mime.starts_with("image/") {
            Some(ContentType::Image)
        } else if mime.starts_with("video/") {
            Some(ContentType::Video)
        } else {
            None
        }
    }

    pub async fn store(&self, mime: &str, data: &[u8]) -> Result<StoredMedia, ApiError> {
        let content_type = Self::classify(mime)
            .ok_or_else(|| ApiError::Validation("Unsupported file type".into()))?;

        let name = match mime.split('/').nth(1).filter(|ext| is_safe_ext(ext)) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        let path = self.dir.join(&name);
        fs::write(&path, data)
            .await
            .with_context(|| format!("writing media file {}", path.display()))
            .map_err(ApiError::Upstream)?;

        Ok(StoredMedia {
            url: format!("/media/{}", name),
            content_type,
        })
    }
}

fn is_safe_ext(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_by_mime_prefix() {
        assert_eq!(MediaStore::classify("image/png"), Some(ContentType::Image));
        assert_eq!(MediaStore::classify("image/jpeg"), Some(ContentType::Image));
        assert_eq!(MediaStore::classify("video/mp4"), Some(ContentType::Video));
        assert_eq!(MediaStore::classify("audio/mpeg"), None);
        assert_eq!(MediaStore::classify("application/pdf"), None);
        assert_eq!(MediaStore::classify("text/plain"), None);
    }

    #[tokio::test]
    async fn store_writes_and_returns_media_url() {
        let dir = std::env::temp_dir().join(format!("ripple-media-{}", Uuid::new_v4()));
        let store = MediaStore::new(dir.clone()).await.unwrap();

        let stored = store.store("image/png", b"not-really-a-png").await.unwrap();
        assert!(stored.url.starts_with("/media/"));
        assert!(stored.url.ends_with(".png"));
        assert_eq!(stored.content_type, ContentType::Image);

        let name = stored.url.strip_prefix("/media/").unwrap();
        assert!(dir.join(name).exists());

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_mime_is_rejected_before_write() {
        let dir = std::env::temp_dir().join(format!("ripple-media-{}", Uuid::new_v4()));
        let store = MediaStore::new(dir.clone()).await.unwrap();

        let err = store.store("application/zip", b"zzz").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
