//! Blob storage consumed by the job service.
//!
//! Submissions may carry an attachment instead of an inline value; the
//! bytes live in a blob store and jobs only hold a reference. The core
//! needs two operations: save bytes and stream them back.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

use crate::model::Attachment;

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Stores the given bytes and returns the blob reference. The
    /// content type falls back to a guess from the file name.
    async fn save(
        &self,
        name: &str,
        content_type: Option<&str>,
        content: &[u8],
    ) -> std::io::Result<Attachment>;

    /// Opens the stored blob as a byte stream.
    async fn source(&self, id: &str) -> std::io::Result<Pin<Box<dyn AsyncRead + Send>>>;
}

/// Attachment store backed by a local directory, one file per blob.
pub struct FileAttachmentStore {
    root: PathBuf,
}

impl FileAttachmentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[async_trait]
impl AttachmentStore for FileAttachmentStore {
    async fn save(
        &self,
        name: &str,
        content_type: Option<&str>,
        content: &[u8],
    ) -> std::io::Result<Attachment> {
        tokio::fs::create_dir_all(&self.root).await?;

        let id = Uuid::new_v4().to_string();
        let hash = format!("{:x}", Sha256::digest(content));
        let content_type = content_type
            .map(|ct| ct.to_string())
            .or_else(|| mime_guess::from_path(name).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut file = tokio::fs::File::create(self.blob_path(&id)).await?;
        file.write_all(content).await?;
        file.flush().await?;

        Ok(Attachment {
            id,
            name: name.to_string(),
            content_type,
            size: content.len() as i64,
            hash,
        })
    }

    async fn source(&self, id: &str) -> std::io::Result<Pin<Box<dyn AsyncRead + Send>>> {
        let file = tokio::fs::File::open(self.blob_path(id)).await?;
        Ok(Box::pin(file))
    }
}
