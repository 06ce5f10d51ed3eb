//! Local enrollment record: which device this handset is, and where its
//! server lives.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,
    pub server_url: String,
    pub enrolled_at: DateTime<Utc>,
}

/// JSON file holding the [`DeviceIdentity`].
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the handset has never been enrolled or was unlinked.
    pub async fn load(&self) -> Result<Option<DeviceIdentity>, AgentError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, identity: &DeviceIdentity) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(identity)?;
        tokio::fs::write(&self.path, bytes).await?;
        info!(device_id = %identity.device_id, path = %self.path.display(), "Identity saved");
        Ok(())
    }

    /// Forgets the enrollment. Clearing an absent identity is not an error.
    pub async fn clear(&self) -> Result<(), AgentError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Identity cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
