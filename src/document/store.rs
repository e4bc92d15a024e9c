use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::core::errors::PipelineError;

/// The document questions are currently answered against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Bumped on every upload; identifies the document an index belongs to.
    pub version: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn storage_path(&self) -> String {
        self.path.display().to_string()
    }
}

/// Single-slot document store backed by the uploads directory.
///
/// The slot's write lock is held across the file write and the rename, so a
/// reader either sees the previous document or the complete new one.
pub struct DocumentStore {
    uploads_dir: PathBuf,
    current: RwLock<Option<StoredDocument>>,
}

impl DocumentStore {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            current: RwLock::new(None),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Writes `bytes` under the sanitized `file_name` and makes it the current
    /// document. A file with the same name is overwritten.
    pub async fn save(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredDocument, PipelineError> {
        let file_name = sanitize_file_name(file_name)?;
        if bytes.is_empty() {
            return Err(PipelineError::Upload(format!("'{}' is empty", file_name)));
        }

        let mut slot = self.current.write().await;

        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let target = self.uploads_dir.join(&file_name);
        let partial = self
            .uploads_dir
            .join(format!(".{}.{}.part", file_name, uuid::Uuid::new_v4()));

        if let Err(err) = write_file(&partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }

        let document = StoredDocument {
            path: target,
            file_name,
            size_bytes: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
            version: slot.as_ref().map_or(1, |doc| doc.version + 1),
            uploaded_at: Utc::now(),
        };

        tracing::info!(
            path = %document.path.display(),
            size_bytes = document.size_bytes,
            version = document.version,
            "stored uploaded document"
        );

        *slot = Some(document.clone());
        Ok(document)
    }

    pub async fn current(&self) -> Option<StoredDocument> {
        self.current.read().await.clone()
    }

    pub async fn require_current(&self) -> Result<StoredDocument, PipelineError> {
        self.current().await.ok_or(PipelineError::NoDocument)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Keeps only the last path component of a client-supplied name.
pub fn sanitize_file_name(raw: &str) -> Result<String, PipelineError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(PipelineError::Upload(format!(
            "'{}' is not a usable file name",
            raw
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(PipelineError::Upload(
            "file name contains control characters".to_string(),
        ));
    }
    Ok(name.to_string())
}
