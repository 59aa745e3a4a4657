//! Outgoing and inbound message logs

use std::sync::Arc;

use chatpilot_common::{Error, Result};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::file::FileStorage;
use crate::models::{InboundRecord, OutgoingMessage};

/// File name of the outgoing message log
pub const OUTGOING_FILE: &str = "messages.toml";

/// File name of the inbound history log
pub const INBOUND_FILE: &str = "inbound_messages.json";

const SECTION_PREFIX: &str = "message_";

/// Append-only log of sent messages, one `[message_NNNNNN]` table per entry
#[derive(Clone)]
pub struct OutgoingLog {
    storage: Arc<dyn FileStorage>,
    write_lock: Arc<Mutex<()>>,
}

impl OutgoingLog {
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Parse the log; a corrupt log reads as empty.
    ///
    /// With `set_aside`, a corrupt log is first moved out of the way so the
    /// next write starts a new file instead of destroying the old one.
    async fn read_table(&self, set_aside: bool) -> Result<toml::Table> {
        let Some(bytes) = self.storage.read_optional(OUTGOING_FILE).await? else {
            return Ok(toml::Table::new());
        };
        match String::from_utf8_lossy(&bytes).parse::<toml::Table>() {
            Ok(table) => Ok(table),
            Err(e) if set_aside => {
                warn!(error = %e, "Outgoing log is corrupt, starting a new one");
                super::quarantine(self.storage.as_ref(), OUTGOING_FILE).await?;
                Ok(toml::Table::new())
            }
            Err(e) => {
                warn!(error = %e, "Outgoing log is corrupt");
                Ok(toml::Table::new())
            }
        }
    }

    /// Append one entry and return its section name
    pub async fn append(&self, message: &OutgoingMessage) -> Result<String> {
        let _guard = self.write_lock.lock().await;

        let mut table = self.read_table(true).await?;
        let next_id = table
            .keys()
            .filter(|k| k.starts_with(SECTION_PREFIX))
            .count();
        let mut section = format!("{}{:06}", SECTION_PREFIX, next_id);
        // A hand-edited log may have gaps; never overwrite an existing entry
        let mut bump = next_id;
        while table.contains_key(&section) {
            bump += 1;
            section = format!("{}{:06}", SECTION_PREFIX, bump);
        }

        let value = toml::Value::try_from(message)
            .map_err(|e| Error::Storage(format!("Failed to encode message: {}", e)))?;
        table.insert(section.clone(), value);

        let text = toml::to_string(&table)
            .map_err(|e| Error::Storage(format!("Failed to encode message log: {}", e)))?;
        self.storage.store(OUTGOING_FILE, text.as_bytes()).await?;

        debug!(section = %section, receiver = %message.receiver, kind = %message.kind, "Logged outgoing message");
        Ok(section)
    }

    /// All entries in section order
    pub async fn load_all(&self) -> Result<Vec<OutgoingMessage>> {
        let table = self.read_table(false).await?;
        let mut sections: Vec<(&String, &toml::Value)> = table
            .iter()
            .filter(|(k, _)| k.starts_with(SECTION_PREFIX))
            .collect();
        sections.sort_by(|a, b| a.0.cmp(b.0));

        Ok(sections
            .into_iter()
            .filter_map(|(name, value)| match OutgoingMessage::deserialize(value.clone()) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!(section = %name, error = %e, "Skipping unreadable log entry");
                    None
                }
            })
            .collect())
    }
}

/// Display history of received messages
#[derive(Clone)]
pub struct InboundLog {
    storage: Arc<dyn FileStorage>,
    write_lock: Arc<Mutex<()>>,
}

impl InboundLog {
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn read_all(&self) -> Vec<InboundRecord> {
        match super::load_json::<Vec<InboundRecord>>(self.storage.as_ref(), INBOUND_FILE).await {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Inbound log unreadable, starting a new one");
                Vec::new()
            }
        }
    }

    pub async fn append(&self, record: InboundRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await;
        records.push(record);
        super::save_json(self.storage.as_ref(), INBOUND_FILE, &records).await
    }

    /// Most recent entries first; `limit == 0` returns everything
    pub async fn load_recent(&self, limit: usize) -> Vec<InboundRecord> {
        let mut records = self.read_all().await;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if limit > 0 {
            records.truncate(limit);
        }
        records
    }

    /// Remove entries older than `max_days`, returning how many were dropped
    pub async fn prune_older_than(&self, max_days: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cutoff = Utc::now() - Duration::days(max_days);

        let mut records = self.read_all().await;
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let removed = before - records.len();

        if removed > 0 {
            super::save_json(self.storage.as_ref(), INBOUND_FILE, &records).await?;
            debug!(removed, "Pruned inbound log");
        }
        Ok(removed)
    }
}
