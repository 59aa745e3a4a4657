//! Add-friend worklist repository

use std::sync::Arc;

use chatpilot_common::Result;
use tracing::warn;

use crate::file::FileStorage;
use crate::models::FriendRequestRecord;

/// File name of the add-friend worklist
pub const FRIEND_REQUESTS_FILE: &str = "add_friend_data.json";

/// Friend request worklist repository
#[derive(Clone)]
pub struct FriendRequestRepository {
    storage: Arc<dyn FileStorage>,
}

impl FriendRequestRepository {
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self { storage }
    }

    /// Load the worklist in its stored order
    pub async fn load(&self) -> Result<Vec<FriendRequestRecord>> {
        match super::load_json(self.storage.as_ref(), FRIEND_REQUESTS_FILE).await {
            Ok(records) => Ok(records.unwrap_or_default()),
            Err(e) => {
                warn!(error = %e, "Friend worklist unreadable, starting empty");
                Ok(Vec::new())
            }
        }
    }

    pub async fn save(&self, records: &[FriendRequestRecord]) -> Result<()> {
        super::save_json(self.storage.as_ref(), FRIEND_REQUESTS_FILE, records).await
    }
}

/// Append rows whose phone is not yet present, returning how many were added
pub fn merge_unique(
    existing: &mut Vec<FriendRequestRecord>,
    incoming: impl IntoIterator<Item = FriendRequestRecord>,
) -> usize {
    let mut added = 0;
    for mut record in incoming {
        let phone = record.phone.trim().to_string();
        if phone.is_empty() || existing.iter().any(|r| r.phone == phone) {
            continue;
        }
        record.phone = phone;
        existing.push(record);
        added += 1;
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::LocalStorage;
    use crate::models::FriendRequestStatus;
    use tempfile::TempDir;

    #[test]
    fn test_merge_ignores_duplicate_phones() {
        let mut list = vec![FriendRequestRecord::new("13800000001", "hi")];
        let added = merge_unique(
            &mut list,
            vec![
                FriendRequestRecord::new(" 13800000001 ", "again"),
                FriendRequestRecord::new("13800000002", "hi"),
                FriendRequestRecord::new("13800000002", "dup"),
                FriendRequestRecord::new("  ", "blank"),
            ],
        );
        assert_eq!(added, 1);
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].phone, "13800000002");
        assert_eq!(list[1].greeting, "hi");
    }

    #[tokio::test]
    async fn test_save_and_load_worklist() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn FileStorage> = Arc::new(LocalStorage::from_path(dir.path()).unwrap());
        let repo = FriendRequestRepository::new(storage);

        let mut record = FriendRequestRecord::new("13800000001", "hello");
        record.status = FriendRequestStatus::Added;
        repo.save(&[record.clone()]).await.unwrap();

        assert_eq!(repo.load().await.unwrap(), vec![record]);
    }
}
