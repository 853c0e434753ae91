//! Credential persistence backends.
//!
//! The [`TokenStore`] trait abstracts the per-profile credential key-value
//! store. The server normally runs on [`FileTokenStore`]; [`MemoryTokenStore`]
//! backs tests and ephemeral deployments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use calbridge_core::ProfileId;

use crate::error::StoreError;
use crate::record::CredentialRecord;

/// Counter for unique temp file names within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-profile credential storage.
///
/// `get` returning `Ok(None)` means "no credential stored"; `Err` always
/// means the backend itself is unavailable.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Reads the credential for a profile.
    async fn get(&self, profile: &ProfileId) -> Result<Option<CredentialRecord>, StoreError>;

    /// Writes (or replaces) the credential for a profile.
    async fn put(&self, profile: &ProfileId, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Deletes the credential for a profile. Deleting an absent credential
    /// is not an error.
    async fn delete(&self, profile: &ProfileId) -> Result<(), StoreError>;

    /// Lists every profile with a stored credential.
    async fn list_profiles(&self) -> Result<Vec<ProfileId>, StoreError>;
}

/// File-backed credential store.
///
/// One JSON file per profile, named `<profile>.json`, written atomically
/// (temp file + rename) with owner-only permissions on Unix.
#[derive(Debug)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// Creates a store rooted at the given directory.
    ///
    /// The directory is created lazily on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory this store writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, profile: &ProfileId) -> PathBuf {
        self.dir.join(format!("{profile}.json"))
    }

    fn temp_path_for(&self, profile: &ProfileId) -> PathBuf {
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{profile}.{}.{counter}.tmp",
            std::process::id()
        ))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, profile: &ProfileId) -> Result<Option<CredentialRecord>, StoreError> {
        let path = self.path_for(profile);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%profile, "no credential file");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::new(format!("read {}: {e}", path.display()))),
        };

        let record = serde_json::from_str(&content)
            .map_err(|e| StoreError::new(format!("parse {}: {e}", path.display())))?;
        Ok(Some(record))
    }

    async fn put(&self, profile: &ProfileId, record: &CredentialRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::new(format!("create {}: {e}", self.dir.display())))?;

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::new(format!("serialize credential: {e}")))?;

        // Write to a temp file first, then rename for atomicity
        let temp_path = self.temp_path_for(profile);
        let path = self.path_for(profile);

        fs::write(&temp_path, &content)
            .await
            .map_err(|e| StoreError::new(format!("write {}: {e}", temp_path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = fs::set_permissions(&temp_path, perms).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(StoreError::new(format!(
                    "set permissions on {}: {e}",
                    temp_path.display()
                )));
            }
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::new(format!("rename to {}: {e}", path.display())));
        }

        debug!(%profile, path = %path.display(), "saved credential");
        Ok(())
    }

    async fn delete(&self, profile: &ProfileId) -> Result<(), StoreError> {
        let path = self.path_for(profile);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(%profile, "deleted credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::new(format!("remove {}: {e}", path.display()))),
        }
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileId>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::new(format!("list {}: {e}", self.dir.display()))),
        };

        let mut profiles = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::new(format!("list {}: {e}", self.dir.display())))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Temp files and foreign files do not parse as profile ids
            if let Ok(profile) = ProfileId::new(stem) {
                profiles.push(profile);
            }
        }
        profiles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(profiles)
    }
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<ProfileId, CredentialRecord>>,
}

impl MemoryTokenStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, profile: &ProfileId) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.records.read().await.get(profile).cloned())
    }

    async fn put(&self, profile: &ProfileId, record: &CredentialRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(profile.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, profile: &ProfileId) -> Result<(), StoreError> {
        self.records.write().await.remove(profile);
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileId>, StoreError> {
        let mut profiles: Vec<ProfileId> = self.records.read().await.keys().cloned().collect();
        profiles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(profiles)
    }
}
