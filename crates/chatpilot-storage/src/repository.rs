//! Repository layer for data access

pub mod campaigns;
pub mod friend_requests;
pub mod messages;
pub mod rules;

pub use campaigns::CampaignRepository;
pub use friend_requests::{merge_unique, FriendRequestRepository};
pub use messages::{InboundLog, OutgoingLog};
pub use rules::{dedupe_rules, RulesLoad, RulesRepository};

use crate::file::FileStorage;
use chatpilot_common::{Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Read a JSON document, returning `None` when the file is absent
pub(crate) async fn load_json<T: DeserializeOwned>(
    storage: &dyn FileStorage,
    path: &str,
) -> Result<Option<T>> {
    match storage.read_optional(path).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path, e))),
        None => Ok(None),
    }
}

/// Write a JSON document atomically
pub(crate) async fn save_json<T: Serialize + ?Sized>(
    storage: &dyn FileStorage,
    path: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    storage.store(path, &bytes).await?;
    Ok(())
}

/// Move an unreadable file aside so the next write cannot destroy it.
///
/// Returns the path the file now lives at.
pub(crate) async fn quarantine(storage: &dyn FileStorage, path: &str) -> Result<String> {
    let target = format!("{}.corrupt-{}", path, Utc::now().format("%Y%m%dT%H%M%S%3f"));
    storage.rename(path, &target).await?;
    warn!(from = %path, to = %target, "Moved unreadable file aside");
    Ok(target)
}
