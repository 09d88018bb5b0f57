//! Media uploader
//!
//! Resolves local binary attachments to durable reference URLs before a
//! record is finalized. Transient failures bounce back to the sync engine
//! for backoff; permanent failures only fail the attachment step, never the
//! scalar fields that ride alongside it.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Attachment upload errors, split by retryability
#[derive(Error, Debug, Clone)]
pub enum MediaError {
	/// Worth retrying on a later pass
	#[error("Transient upload failure: {0}")]
	Transient(String),

	/// Malformed or unreadable attachment; retrying cannot help
	#[error("Permanent upload failure: {0}")]
	Permanent(String),
}

/// Turns a local attachment into a durable reference URL
#[async_trait]
pub trait MediaUploader: Send + Sync {
	async fn upload(&self, local_path: &Path) -> Result<String, MediaError>;
}

/// Content-addressed uploader backed by a local directory
///
/// Copies the attachment under its SHA-256 digest and hands back a `file://`
/// URL. Stands in for the remote object store in local mode; re-uploading
/// identical content is a no-op by construction.
pub struct FsMediaUploader {
	root: PathBuf,
}

impl FsMediaUploader {
	pub fn new(root: PathBuf) -> Self {
		Self { root }
	}
}

#[async_trait]
impl MediaUploader for FsMediaUploader {
	async fn upload(&self, local_path: &Path) -> Result<String, MediaError> {
		let bytes = tokio::fs::read(local_path).await.map_err(|e| {
			// A vanished source file cannot recover on retry.
			if e.kind() == std::io::ErrorKind::NotFound {
				MediaError::Permanent(format!("attachment missing: {}", local_path.display()))
			} else {
				MediaError::Transient(format!("read {}: {e}", local_path.display()))
			}
		})?;

		if bytes.is_empty() {
			return Err(MediaError::Permanent(format!(
				"attachment empty: {}",
				local_path.display()
			)));
		}

		let digest = hex::encode(Sha256::digest(&bytes));
		let extension = local_path
			.extension()
			.map(|ext| format!(".{}", ext.to_string_lossy()))
			.unwrap_or_default();
		let dest = self.root.join(format!("{digest}{extension}"));

		tokio::fs::create_dir_all(&self.root)
			.await
			.map_err(|e| MediaError::Transient(format!("create {}: {e}", self.root.display())))?;

		if !dest.exists() {
			tokio::fs::write(&dest, &bytes)
				.await
				.map_err(|e| MediaError::Transient(format!("write {}: {e}", dest.display())))?;
		}

		debug!("Uploaded {} -> {}", local_path.display(), dest.display());
		Ok(format!("file://{}", dest.display()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn uploads_are_content_addressed() {
		let dir = TempDir::new().unwrap();
		let source = dir.path().join("photo.jpg");
		tokio::fs::write(&source, b"not really a jpeg").await.unwrap();

		let uploader = FsMediaUploader::new(dir.path().join("store"));
		let first = uploader.upload(&source).await.unwrap();
		let second = uploader.upload(&source).await.unwrap();

		assert_eq!(first, second);
		assert!(first.starts_with("file://"));
	}

	#[tokio::test]
	async fn missing_attachment_is_permanent() {
		let dir = TempDir::new().unwrap();
		let uploader = FsMediaUploader::new(dir.path().join("store"));

		let err = uploader
			.upload(&dir.path().join("nope.jpg"))
			.await
			.unwrap_err();
		assert!(matches!(err, MediaError::Permanent(_)));
	}
}
