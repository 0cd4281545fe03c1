//! Backing storage: one serialized record per user identifier.
//!
//! Directory layout for [`FileBackend`]:
//!   {data_dir}/{percent-encoded user}.json

use crate::{MemoryError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key-value medium holding serialized records
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Stored payload, or `None` if nothing is stored for `user_id`.
    async fn read(&self, user_id: &str) -> Result<Option<String>>;

    /// Replace the stored payload for `user_id`.
    async fn write(&self, user_id: &str, payload: &str) -> Result<()>;

    /// Delete the stored payload. Absent entries are not an error.
    async fn remove(&self, user_id: &str) -> Result<()>;

    /// Keys with a stored payload.
    async fn list(&self) -> Result<Vec<String>>;
}

/// One JSON file per user under a data directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    data_dir: PathBuf,
}

impl FileBackend {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the record file for `user_id`
    pub fn record_path(&self, user_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", file_stem(user_id)))
    }

    async fn ensure_data_dir(&self) -> Result<()> {
        let existed = self.data_dir.exists();
        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| MemoryError::write_failed(&self.data_dir, e))?;
        if !existed {
            set_mode(&self.data_dir, 0o700)
                .await
                .map_err(|e| MemoryError::write_failed(&self.data_dir, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, user_id: &str) -> Result<Option<String>> {
        let path = self.record_path(user_id);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MemoryError::unavailable(&path, e)),
        }
    }

    async fn write(&self, user_id: &str, payload: &str) -> Result<()> {
        self.ensure_data_dir().await?;

        let path = self.record_path(user_id);
        let tmp_path = path.with_extension("json.tmp");

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .await
            .map_err(|e| MemoryError::write_failed(&tmp_path, e))?;
        set_mode(&tmp_path, 0o600)
            .await
            .map_err(|e| MemoryError::write_failed(&tmp_path, e))?;

        file.write_all(payload.as_bytes())
            .await
            .map_err(|e| MemoryError::write_failed(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| MemoryError::write_failed(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| MemoryError::write_failed(&path, e))?;

        debug!(path = %path.display(), bytes = payload.len(), "Wrote memory record");
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> Result<()> {
        let path = self.record_path(user_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MemoryError::write_failed(&path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(users),
            Err(e) => return Err(MemoryError::unavailable(&self.data_dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::unavailable(&self.data_dir, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match user_from_stem(stem) {
                Some(user) => users.push(user),
                None => warn!(file = %name, "Skipping record with undecodable name"),
            }
        }
        users.sort();
        Ok(users)
    }
}

/// Volatile backend kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: RwLock<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While read-only, every write and remove fails with `StorageWriteError`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(MemoryError::StorageWriteError(
                "in-memory backend is read-only".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn read(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn write(&self, user_id: &str, payload: &str) -> Result<()> {
        self.check_writable()?;
        self.records
            .write()
            .await
            .insert(user_id.to_string(), payload.to_string());
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> Result<()> {
        self.check_writable()?;
        self.records.write().await.remove(user_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self.records.read().await.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

/// Map an identifier onto a file name stem. Percent-encoding keeps the
/// mapping one-to-one and leaves no path separators.
pub(crate) fn file_stem(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

/// Inverse of [`file_stem`]; `None` for names it never produces.
fn user_from_stem(stem: &str) -> Option<String> {
    let user = urlencoding::decode(stem).ok()?.into_owned();
    (file_stem(&user) == stem).then_some(user)
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
