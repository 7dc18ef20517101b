use super::EntitlementStore;
use crate::models::UserEntitlement;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One JSON file per user under `<data_dir>/<user_id>/data.json`.
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn record_path(&self, user_id: i64) -> PathBuf {
        self.data_dir.join(user_id.to_string()).join("data.json")
    }

    async fn read_record(path: &Path) -> Result<Option<UserEntitlement>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    // A corrupt record must not lock the user out; treat it
                    // as first access and let the next save rewrite it.
                    warn!("Corrupt entitlement record at {}: {}", path.display(), e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EntitlementStore for JsonFileStore {
    async fn load(&self, user_id: i64) -> Result<Option<UserEntitlement>> {
        Self::read_record(&self.record_path(user_id)).await
    }

    async fn save(&self, user_id: i64, record: &UserEntitlement) -> Result<()> {
        let path = self.record_path(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }
}
