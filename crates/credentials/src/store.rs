//! Credential persistence
//!
//! `CredentialStore` is the contract the pipeline consumes: get / set / clear
//! with read-after-write consistency inside one process. Two implementations:
//!
//! - `MemoryCredentialStore` for embedding and tests
//! - `FileCredentialStore`, a JSON file written with atomic temp-file + rename
//!   so a crash mid-write never leaves a truncated credential behind. A tokio
//!   Mutex serializes writes from request-time rotation, refresh and logout.

use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use transport::BoxFuture;

use crate::credential::Credential;
use crate::error::{Error, Result};

/// Storage for the single active credential.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// Current credential, or `None` when logged out.
    fn get(&self) -> BoxFuture<'_, Option<Credential>>;

    /// Replace the credential wholesale.
    fn set(&self, credential: Credential) -> BoxFuture<'_, Result<()>>;

    /// Remove access token, refresh token and identity.
    fn clear(&self) -> BoxFuture<'_, Result<()>>;
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            state: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> BoxFuture<'_, Option<Credential>> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn set(&self, credential: Credential) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = Some(credential);
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = None;
            Ok(())
        })
    }
}

/// File-backed credential store.
///
/// The in-memory copy is authoritative for reads; every mutation is persisted
/// before the lock is released, so a reader never observes a value that is
/// not also on disk.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credential>>,
}

impl FileCredentialStore {
    /// Load the credential from the given file path.
    ///
    /// A missing file is a cold start: the store begins empty and the file is
    /// only created by the first `set`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credential: Credential = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                subject = credential.subject().unwrap_or("-"),
                "loaded credential"
            );
            Some(credential)
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> BoxFuture<'_, Option<Credential>> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn set(&self, credential: Credential) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &credential).await?;
            *state = Some(credential);
            debug!("stored credential");
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = None;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed credential file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
            }
        })
    }
}

/// Write the credential to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains bearer tokens.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_credential(suffix: &str) -> Credential {
        Credential::new(format!("at_{suffix}"))
            .with_refresh_token(format!("rt_{suffix}"))
            .with_subject("user-1")
            .with_issued_at(1_735_500_000_000)
    }

    #[tokio::test]
    async fn memory_store_read_after_write() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().await.is_none());

        store.set(test_credential("1")).await.unwrap();
        assert_eq!(store.get().await.unwrap().access(), Some("at_1"));

        store.set(test_credential("2")).await.unwrap();
        assert_eq!(store.get().await.unwrap().access(), Some("at_2"));

        store.clear().await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn file_store_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(test_credential("1")).await.unwrap();

        let reloaded = FileCredentialStore::load(path).await.unwrap();
        let cred = reloaded.get().await.unwrap();
        assert_eq!(cred, test_credential("1"));
    }

    #[tokio::test]
    async fn cold_start_is_empty_and_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        assert!(store.get().await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn clear_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(test_credential("1")).await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert!(store.get().await.is_none());

        // Clearing an already-empty store is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = FileCredentialStore::load(path).await.err().unwrap();
        assert!(matches!(err, Error::CredentialParse(_)), "got: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(test_credential("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_leave_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let store = Arc::new(FileCredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(test_credential(&i.to_string())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whatever write landed last, memory and disk agree
        let in_memory = store.get().await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let on_disk: Credential = serde_json::from_str(&contents).unwrap();
        assert_eq!(in_memory, on_disk);
    }
}
