//! Atomic filesystem primitives shared by the cache and sync planner.
//!
//! Every write in this crate goes through [`write_atomic`]: write to a
//! sibling `.tmp` file, then rename over the destination. Renames within
//! the same filesystem are atomic, so a reader never observes a partial
//! write — this is the same discipline the on-disk content store and the
//! cache index both rely on.

use std::path::{Path, PathBuf};

use tap::Pipe;
use tracing::{instrument, trace};

use crate::error::{CodexError, Result};

/// Create a directory and all of its parents, tolerating "already exists".
#[instrument(level = "trace")]
pub async fn create_dir_all(path: &Path) -> Result<()> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CodexError::io(path, e)),
    }
}

/// Write `content` to `path` atomically: write to `path.tmp`, fsync, then
/// rename over `path`. Creates parent directories as needed.
#[instrument(level = "trace", skip(content))]
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| CodexError::io(&tmp_path, e))?;
        use tokio::io::AsyncWriteExt as _;
        file.write_all(content)
            .await
            .map_err(|e| CodexError::io(&tmp_path, e))?;
        file.sync_all().await.map_err(|e| CodexError::io(&tmp_path, e))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| CodexError::io(path, e))?;

    trace!(?path, bytes = content.len(), "wrote file atomically");
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.tmp.{}", std::process::id()))
}

/// Read a file's content, returning `None` if it does not exist.
#[instrument(level = "trace")]
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CodexError::io(path, e)),
    }
}

/// Read a file's content, failing if it does not exist.
#[instrument(level = "trace")]
pub async fn read_required(path: &Path) -> Result<Vec<u8>> {
    read_optional(path)
        .await?
        .ok_or_else(|| CodexError::io(path, std::io::Error::from(std::io::ErrorKind::NotFound)))
}

/// Remove a file, tolerating "already gone" (`ENOENT` is not an error, per
/// the sync planner's delete-operation contract).
#[instrument(level = "trace")]
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CodexError::io(path, e)),
    }
}

/// Report whether a directory exists and has no entries.
pub async fn is_dir_empty(path: &Path) -> Result<bool> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(CodexError::io(path, e)),
    };
    entries
        .next_entry()
        .await
        .map_err(|e| CodexError::io(path, e))?
        .is_none()
        .pipe(Ok)
}

/// Compute the SHA-256 hash of a file's content, streaming to avoid
/// buffering huge files whole.
#[instrument(level = "trace")]
pub async fn hash_file(path: &Path) -> Result<crate::hash::ContentHash> {
    use tokio::io::AsyncReadExt as _;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CodexError::io(path, e))?;
    let mut hasher = sha2::Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| CodexError::io(path, e))?;
        if n == 0 {
            break;
        }
        sha2::Digest::update(&mut hasher, &buf[..n]);
    }
    let digest = sha2::Digest::finalize(hasher);
    Ok(crate::hash::ContentHash::from_hex(hex::encode(digest)))
}
