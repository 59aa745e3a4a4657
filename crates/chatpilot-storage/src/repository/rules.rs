//! Rules/settings document repository

use std::sync::Arc;

use chatpilot_common::Result;
use tracing::{error, info, warn};

use crate::file::FileStorage;
use crate::models::{local_timestamp, RuleRecord, RulesDocument};

/// File name of the rules/settings document
pub const RULES_FILE: &str = "auto_reply_rules.json";

/// Outcome of loading the rules document
#[derive(Debug, Clone)]
pub struct RulesLoad {
    pub document: RulesDocument,
    /// The file was missing, empty or corrupt and has been rewritten with defaults
    pub reinitialised: bool,
}

/// Rules repository
#[derive(Clone)]
pub struct RulesRepository {
    storage: Arc<dyn FileStorage>,
}

impl RulesRepository {
    /// Create a new rules repository
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self { storage }
    }

    /// Load the document, rewriting it with defaults when it cannot be used.
    ///
    /// Failing to write the defaults is logged; the defaults are still returned.
    /// A file that exists but cannot be read is left untouched.
    pub async fn load(&self) -> Result<RulesLoad> {
        let bytes = match self.storage.read_optional(RULES_FILE).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Rules file unreadable, using defaults");
                return Ok(RulesLoad {
                    document: RulesDocument::default(),
                    reinitialised: true,
                });
            }
        };

        let parsed = match bytes {
            None => {
                info!("Rules file not found, creating defaults");
                None
            }
            Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {
                warn!("Rules file is empty, reinitialising");
                None
            }
            Some(bytes) => match serde_json::from_slice::<RulesDocument>(&bytes) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!(error = %e, "Rules file is corrupt, reinitialising");
                    None
                }
            },
        };

        match parsed {
            Some(mut document) => {
                document.rules = dedupe_rules(std::mem::take(&mut document.rules));
                info!(rules = document.rules.len(), "Loaded rules");
                Ok(RulesLoad {
                    document,
                    reinitialised: false,
                })
            }
            None => {
                let document = RulesDocument::default();
                if let Err(e) = self.save(&document).await {
                    error!(error = %e, "Failed to write default rules");
                }
                Ok(RulesLoad {
                    document,
                    reinitialised: true,
                })
            }
        }
    }

    /// Persist the document with a fresh `last_update`
    pub async fn save(&self, document: &RulesDocument) -> Result<()> {
        let mut document = document.clone();
        document.last_update = local_timestamp();
        super::save_json(self.storage.as_ref(), RULES_FILE, &document).await
    }
}

/// Drop earlier rules that share a keyword with a later one
pub fn dedupe_rules(rules: Vec<RuleRecord>) -> Vec<RuleRecord> {
    let mut unique: Vec<RuleRecord> = Vec::with_capacity(rules.len());
    for rule in rules {
        if unique.iter().any(|r| r.keyword == rule.keyword) {
            warn!(keyword = %rule.keyword, "Duplicate keyword, keeping the last one");
            unique.retain(|r| r.keyword != rule.keyword);
        }
        unique.push(rule);
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::LocalStorage;
    use crate::models::SettingsRecord;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn repo(dir: &TempDir) -> (RulesRepository, Arc<dyn FileStorage>) {
        let storage: Arc<dyn FileStorage> = Arc::new(LocalStorage::from_path(dir.path()).unwrap());
        (RulesRepository::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let (repo, storage) = repo(&dir);

        let loaded = repo.load().await.unwrap();
        assert!(loaded.reinitialised);
        assert!(loaded.document.rules.is_empty());
        assert_eq!(loaded.document.settings, SettingsRecord::default());
        assert!(storage.exists(RULES_FILE).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_and_empty_files_are_reinitialised() {
        let dir = TempDir::new().unwrap();
        let (repo, storage) = repo(&dir);

        storage.store(RULES_FILE, b"   \n").await.unwrap();
        assert!(repo.load().await.unwrap().reinitialised);

        storage.store(RULES_FILE, b"{not json").await.unwrap();
        let loaded = repo.load().await.unwrap();
        assert!(loaded.reinitialised);

        // The rewritten file loads cleanly afterwards
        assert!(!repo.load().await.unwrap().reinitialised);
    }

    #[tokio::test]
    async fn test_duplicate_keywords_keep_last() {
        let dir = TempDir::new().unwrap();
        let (repo, storage) = repo(&dir);

        let raw = r#"{
            "rules": [
                {"keyword": "hi", "reply": "first", "enabled": true},
                {"keyword": "price", "reply": "ten", "enabled": false},
                {"keyword": "hi", "reply": "second"}
            ],
            "settings": {"rule_reply_enabled": true, "min_interval": "2", "max_interval": "4"}
        }"#;
        storage.store(RULES_FILE, raw.as_bytes()).await.unwrap();

        let loaded = repo.load().await.unwrap();
        let rules = loaded.document.rules;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].keyword, "price");
        assert_eq!(rules[1], RuleRecord::new("hi", "second"));
        assert!(loaded.document.settings.rule_reply_enabled);
        assert_eq!(loaded.document.settings.min_interval, 2);
    }

    #[tokio::test]
    async fn test_save_round_trip_updates_timestamp() {
        let dir = TempDir::new().unwrap();
        let (repo, _) = repo(&dir);

        let mut doc = RulesDocument::default();
        doc.last_update = String::new();
        doc.rules.push(RuleRecord::new("hello", "world"));
        repo.save(&doc).await.unwrap();

        let loaded = repo.load().await.unwrap().document;
        assert_eq!(loaded.rules, doc.rules);
        assert!(!loaded.last_update.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_defaults_still_load() {
        let dir = TempDir::new().unwrap();
        let (repo, storage) = repo(&dir);

        // The atomic write goes through `<file>.tmp`; a directory there blocks it
        std::fs::create_dir(dir.path().join(format!("{}.tmp", RULES_FILE))).unwrap();

        let loaded = repo.load().await.unwrap();
        assert!(loaded.reinitialised);
        assert_eq!(loaded.document.settings, SettingsRecord::default());
        assert!(!storage.exists(RULES_FILE).await.unwrap());
    }
}
