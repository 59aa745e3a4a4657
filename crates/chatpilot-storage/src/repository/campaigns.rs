//! Campaign backlog repository

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatpilot_common::{Error, Result};
use tracing::{debug, error, warn};

use crate::file::FileStorage;
use crate::models::{Campaign, CampaignBacklog};

/// File name of the campaign backlog
pub const CAMPAIGNS_FILE: &str = "campaigns.json";

/// Campaign repository
#[derive(Clone)]
pub struct CampaignRepository {
    storage: Arc<dyn FileStorage>,
    /// Set when an unreadable backlog could not be moved aside
    frozen: Arc<AtomicBool>,
}

impl CampaignRepository {
    /// Create a new campaign repository
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self {
            storage,
            frozen: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load every persisted campaign.
    ///
    /// An unreadable backlog is moved aside and the table starts empty. When
    /// it cannot be moved, saving is refused so the file is never overwritten.
    pub async fn load(&self) -> Result<Vec<Campaign>> {
        match super::load_json::<CampaignBacklog>(self.storage.as_ref(), CAMPAIGNS_FILE).await {
            Ok(Some(backlog)) => {
                debug!(count = backlog.campaigns.len(), "Loaded campaign backlog");
                Ok(backlog.campaigns)
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                warn!(error = %e, "Campaign backlog unreadable, starting empty");
                if let Err(e) = super::quarantine(self.storage.as_ref(), CAMPAIGNS_FILE).await {
                    error!(error = %e, "Could not move the backlog aside, saving disabled");
                    self.frozen.store(true, Ordering::SeqCst);
                }
                Ok(Vec::new())
            }
        }
    }

    /// Whether saves are refused to protect an unreadable backlog
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Replace the persisted backlog
    pub async fn save(&self, campaigns: &[Campaign]) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::Storage(format!(
                "{} is unreadable and was kept as is",
                CAMPAIGNS_FILE
            )));
        }
        let backlog = CampaignBacklog {
            campaigns: campaigns.to_vec(),
        };
        super::save_json(self.storage.as_ref(), CAMPAIGNS_FILE, &backlog).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::LocalStorage;
    use crate::models::{CampaignStatus, CampaignTarget};
    use chatpilot_common::types::DelayRange;
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_save_and_load_backlog() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn FileStorage> = Arc::new(LocalStorage::from_path(dir.path()).unwrap());
        let repo = CampaignRepository::new(storage.clone());

        assert!(repo.load().await.unwrap().is_empty());

        let campaign = Campaign {
            id: Uuid::now_v7(),
            name: "launch".to_string(),
            due_at: Utc::now(),
            targets: vec![CampaignTarget::new("wxid_a", "Alice")],
            text: "hello".to_string(),
            media_path: None,
            delay: DelayRange::new(1, 3),
            pid: Some(42),
            status: CampaignStatus::Waiting,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            sent_count: 0,
            failed_count: 0,
        };
        repo.save(std::slice::from_ref(&campaign)).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded, vec![campaign]);
    }

    #[tokio::test]
    async fn test_unreadable_backlog_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn FileStorage> = Arc::new(LocalStorage::from_path(dir.path()).unwrap());
        let repo = CampaignRepository::new(storage.clone());

        let broken = br#"{"campaigns":[{"bogus":true}]}"#;
        storage.store(CAMPAIGNS_FILE, broken).await.unwrap();
        assert!(repo.load().await.unwrap().is_empty());
        assert!(!repo.is_frozen());
        assert!(!storage.exists(CAMPAIGNS_FILE).await.unwrap());

        // The next save starts a fresh backlog and leaves the old one intact
        repo.save(&[]).await.unwrap();
        let kept: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("campaigns.json.corrupt-"))
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(storage.read(&kept[0]).await.unwrap(), broken);
    }

    /// Local storage whose renames always fail
    struct PinnedStorage(LocalStorage);

    #[async_trait::async_trait]
    impl FileStorage for PinnedStorage {
        async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
            self.0.store(path, data).await
        }

        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.0.read(path).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.0.delete(path).await
        }

        async fn rename(&self, _from: &str, _to: &str) -> Result<()> {
            Err(Error::Storage("Failed to rename file: read-only".to_string()))
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.0.exists(path).await
        }
    }

    #[tokio::test]
    async fn test_backlog_that_cannot_be_moved_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn FileStorage> =
            Arc::new(PinnedStorage(LocalStorage::from_path(dir.path()).unwrap()));
        let repo = CampaignRepository::new(storage.clone());

        storage.store(CAMPAIGNS_FILE, b"[broken").await.unwrap();
        assert!(repo.load().await.unwrap().is_empty());
        assert!(repo.is_frozen());

        assert!(matches!(repo.save(&[]).await, Err(Error::Storage(_))));
        assert_eq!(storage.read(CAMPAIGNS_FILE).await.unwrap(), b"[broken");
    }
}
