//! Identity and state persistence for bitmesh nodes.
//!
//! Persists the node identity (raw 64-byte key file), the router outbox and
//! the peer directory across restarts. Uses atomic writes (write to `.tmp`,
//! then rename) to prevent corruption.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use bitmesh_core::constants::PRIVATE_KEY_SIZE;
use bitmesh_core::identity::Identity;
use bitmesh_transport::router::OutboxSnapshot;

use crate::peers::PeerDirectory;

/// File name for the 64-byte raw identity.
const IDENTITY_FILE: &str = "identity";

/// File name for the JSON outbox snapshot.
const OUTBOX_FILE: &str = "outbox.json";

/// File name for the JSON peer directory.
const PEERS_FILE: &str = "peers.json";

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid identity length: expected 64, got {0}")]
    InvalidIdentityLength(usize),

    #[error("failed to determine storage directory: {0}")]
    Directory(String),
}

/// Persistent storage for node state.
pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance, creating the directory if needed.
    ///
    /// # Note
    /// This performs blocking I/O (`create_dir_all`). Call at startup before the async runtime is under load.
    pub fn new(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create storage at the default path (`~/.bitmesh`).
    pub fn default_path() -> Result<Self, StorageError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Directory("could not determine home directory".into()))?;
        Self::new(home.join(".bitmesh"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Save an identity as raw 64 bytes, readable only by the owner.
    pub async fn save_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        let bytes = identity
            .private_key_bytes()
            .ok_or(StorageError::InvalidIdentityLength(0))?;
        let path = self.base_dir.join(IDENTITY_FILE);
        self.atomic_write(&path, &bytes).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }

    /// Load the identity. Returns `Ok(None)` if the file doesn't exist.
    pub async fn load_identity(&self) -> Result<Option<Identity>, StorageError> {
        let path = self.base_dir.join(IDENTITY_FILE);
        match fs::read(&path).await {
            Ok(bytes) => {
                let arr: [u8; PRIVATE_KEY_SIZE] = bytes
                    .try_into()
                    .map_err(|b: Vec<u8>| StorageError::InvalidIdentityLength(b.len()))?;
                Ok(Some(Identity::from_private_bytes(&arr)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Load the stored identity, or generate and save a new one.
    pub async fn load_or_generate_identity(&self) -> Result<Identity, StorageError> {
        if let Some(identity) = self.load_identity().await? {
            tracing::info!(peer = %identity.peer_id(), "loaded identity");
            return Ok(identity);
        }
        let identity = Identity::generate();
        self.save_identity(&identity).await?;
        tracing::info!(peer = %identity.peer_id(), "generated and saved new identity");
        Ok(identity)
    }

    pub async fn save_outbox(&self, snapshot: &OutboxSnapshot) -> Result<(), StorageError> {
        self.save_json(OUTBOX_FILE, snapshot).await
    }

    /// Load the outbox. Returns an empty snapshot if the file doesn't exist.
    pub async fn load_outbox(&self) -> Result<OutboxSnapshot, StorageError> {
        self.load_json(OUTBOX_FILE).await
    }

    pub async fn save_peers(&self, peers: &PeerDirectory) -> Result<(), StorageError> {
        self.save_json(PEERS_FILE, peers).await
    }

    /// Load the peer directory. Returns an empty one if the file doesn't exist.
    pub async fn load_peers(&self) -> Result<PeerDirectory, StorageError> {
        self.load_json(PEERS_FILE).await
    }

    async fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialize(e.to_string()))?;
        self.atomic_write(&self.base_dir.join(name), &bytes).await
    }

    async fn load_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StorageError> {
        match fs::read(self.base_dir.join(name)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Deserialize(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write data atomically: write to a `.tmp` file then rename.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}
