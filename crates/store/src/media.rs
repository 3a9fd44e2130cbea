use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Where a stored media object ended up.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    /// Stable reference recorded on messages/intents (relative path).
    pub media_ref: String,
    pub content_type: String,
    pub size: usize,
}

/// Blob storage boundary for receipt evidence. The core only needs
/// write-and-reference; serving media back out is someone else's job.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(
        &self,
        tenant_id: &str,
        kind: &str,
        message_id: &str,
        content: &[u8],
    ) -> Result<StoredMedia>;
}

/// Filesystem-backed media store. Sniffs the MIME type from the leading
/// bytes so receipts open with the right extension.
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn store(
        &self,
        tenant_id: &str,
        kind: &str,
        message_id: &str,
        content: &[u8],
    ) -> Result<StoredMedia> {
        let (content_type, ext) = match infer::get(content) {
            Some(k) => (k.mime_type().to_string(), format!(".{}", k.extension())),
            None => ("application/octet-stream".to_string(), String::new()),
        };

        let rel = format!("{tenant_id}/media/{kind}/{message_id}{ext}");
        let path = self.root.join(&rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create media directory")?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write media {}", path.display()))?;

        info!(media = %rel, content_type = %content_type, "stored media");
        Ok(StoredMedia {
            media_ref: rel,
            content_type,
            size: content.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_with_sniffed_extension() {
        let dir = std::env::temp_dir().join(format!("shopline-media-{}", uuid::Uuid::new_v4()));
        let store = FsMediaStore::new(dir.clone());
        // Minimal PNG magic bytes
        let png: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let stored = store.store("shop1", "image", "m1", png).await.unwrap();
        assert!(stored.media_ref.ends_with(".png"));
        assert_eq!(stored.content_type, "image/png");
        assert!(dir.join(&stored.media_ref).exists());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
