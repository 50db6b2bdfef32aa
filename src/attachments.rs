//! Attachment store: downloads incident screenshots to local disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::channels::FileFetcher;
use crate::error::AttachmentError;

/// Upper bound on `-N` suffixes tried when a name is already taken.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Persists an inbound photo and returns where it landed.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn store(
        &self,
        file_ref: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, AttachmentError>;
}

/// Stores attachments as `<owner>_<YYYYMMDD_HHMMSS>.jpg` under a directory.
pub struct LocalAttachmentStore {
    dir: PathBuf,
    fetcher: Arc<dyn FileFetcher>,
}

impl LocalAttachmentStore {
    pub fn new(dir: PathBuf, fetcher: Arc<dyn FileFetcher>) -> Self {
        Self { dir, fetcher }
    }

    /// Write `bytes` under a fresh name. Never overwrites an existing file.
    async fn write_unique(&self, base: &str, bytes: &[u8]) -> Result<PathBuf, AttachmentError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_error(&self.dir, e))?;

        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                format!("{base}.jpg")
            } else {
                format!("{base}-{attempt}.jpg")
            };
            let path = self.dir.join(name);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    write_or_discard(&path, file, bytes).await?;
                    return Ok(path);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && attempt < MAX_NAME_ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(e) => return Err(write_error(&path, e)),
            }
        }
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn store(
        &self,
        file_ref: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, AttachmentError> {
        let bytes = self.fetcher.fetch(file_ref).await?;
        let base = attachment_base_name(owner, at);
        let path = self.write_unique(&base, &bytes).await?;

        tracing::info!(
            owner,
            path = %path.display(),
            size = bytes.len(),
            "Attachment stored"
        );
        Ok(path)
    }
}

/// Fill a freshly created file. A partial file is removed on failure.
async fn write_or_discard<W>(path: &Path, mut file: W, bytes: &[u8]) -> Result<(), AttachmentError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %remove_err,
                "Failed to remove partial attachment"
            );
        }
        return Err(write_error(path, e));
    }
    Ok(())
}

fn write_error(path: &Path, source: std::io::Error) -> AttachmentError {
    AttachmentError::Write {
        path: path.display().to_string(),
        source,
    }
}

/// `<owner>_<YYYYMMDD_HHMMSS>`, with the owner reduced to a filesystem-safe form.
/// Letters and digits of any script survive; separators and dots do not.
pub fn attachment_base_name(owner: &str, at: DateTime<Utc>) -> String {
    let safe: String = owner
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() { "user".to_string() } else { safe };
    format!("{safe}_{}", at.format("%Y%m%d_%H%M%S"))
}
