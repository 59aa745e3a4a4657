//! Reply settings and the immutable configuration snapshot
//!
//! The decision engine only ever sees an `Arc<ReplyConfig>` snapshot. All
//! changes go through [`ReplyConfigStore`], which validates them, persists
//! the rules document and publishes a new snapshot.

use crate::rules::{Rule, RuleStore};
use chatpilot_common::types::DelayRange;
use chatpilot_common::Result;
use chatpilot_storage::models::{RulesDocument, SettingsRecord, NEW_FRIEND_KEYWORD};
use chatpilot_storage::RulesRepository;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Which AI backend answers messages no rule matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiBackend {
    #[default]
    LargeModel,
    Assistant,
}

/// Scope, match and AI switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub rule_reply_enabled: bool,
    pub reply_all_friends: bool,
    pub reply_all_groups: bool,
    pub specific_friends_enabled: bool,
    pub specific_groups_enabled: bool,
    pub specific_friends: BTreeSet<String>,
    pub specific_groups: BTreeSet<String>,
    pub exact_match: bool,
    pub fuzzy_match: bool,
    pub ai_enabled: bool,
    pub ai_backend: AiBackend,
    pub new_friend_reply: bool,
    pub interval: DelayRange,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_record(&SettingsRecord::default())
    }
}

impl Settings {
    pub fn from_record(record: &SettingsRecord) -> Self {
        let ai_backend = if record.assistant_reply_enabled && !record.model_reply_enabled {
            AiBackend::Assistant
        } else {
            AiBackend::LargeModel
        };

        Self {
            rule_reply_enabled: record.rule_reply_enabled,
            reply_all_friends: record.reply_friend_enabled,
            reply_all_groups: record.reply_group_enabled,
            specific_friends_enabled: record.specific_friend_enabled,
            specific_groups_enabled: record.specific_group_enabled,
            specific_friends: record.specific_friends.iter().cloned().collect(),
            specific_groups: record.specific_groups.iter().cloned().collect(),
            exact_match: record.exact_match_enabled,
            fuzzy_match: record.fuzzy_match_enabled,
            ai_enabled: record.ai_reply_enabled,
            ai_backend,
            new_friend_reply: record.new_friend_reply_enabled,
            interval: record.interval(),
        }
    }

    pub fn to_record(&self) -> SettingsRecord {
        SettingsRecord {
            rule_reply_enabled: self.rule_reply_enabled,
            reply_friend_enabled: self.reply_all_friends,
            reply_group_enabled: self.reply_all_groups,
            specific_friend_enabled: self.specific_friends_enabled,
            specific_group_enabled: self.specific_groups_enabled,
            specific_friends: self.specific_friends.iter().cloned().collect(),
            specific_groups: self.specific_groups.iter().cloned().collect(),
            ai_reply_enabled: self.ai_enabled,
            assistant_reply_enabled: self.ai_enabled && self.ai_backend == AiBackend::Assistant,
            model_reply_enabled: self.ai_enabled && self.ai_backend == AiBackend::LargeModel,
            new_friend_reply_enabled: self.new_friend_reply,
            new_friend_reply_content: None,
            fuzzy_match_enabled: self.fuzzy_match,
            exact_match_enabled: self.exact_match,
            min_interval: self.interval.min,
            max_interval: self.interval.upper(),
        }
    }

    /// Enabling exact matching turns fuzzy matching off, and the reverse
    pub fn set_exact_match(&mut self, enabled: bool) {
        self.exact_match = enabled;
        if enabled {
            self.fuzzy_match = false;
        }
    }

    pub fn set_fuzzy_match(&mut self, enabled: bool) {
        self.fuzzy_match = enabled;
        if enabled {
            self.exact_match = false;
        }
    }

    /// Whether a direct message from `sender` is in scope
    pub fn allows_friend(&self, sender: &str) -> bool {
        self.reply_all_friends
            || (self.specific_friends_enabled && self.specific_friends.contains(sender))
    }

    /// Whether a message in group `group_id` is in scope (mention not considered)
    pub fn allows_group(&self, group_id: &str) -> bool {
        self.reply_all_groups
            || (self.specific_groups_enabled && self.specific_groups.contains(group_id))
    }

    /// Active AI backend, if AI replies are on
    pub fn ai_backend(&self) -> Option<AiBackend> {
        self.ai_enabled.then_some(self.ai_backend)
    }
}

/// A single settings mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    RuleReply(bool),
    ReplyAllFriends(bool),
    ReplyAllGroups(bool),
    SpecificFriends {
        enabled: bool,
        ids: Option<Vec<String>>,
    },
    SpecificGroups {
        enabled: bool,
        ids: Option<Vec<String>>,
    },
    ExactMatch(bool),
    FuzzyMatch(bool),
    /// `None` disables AI replies
    Ai(Option<AiBackend>),
    NewFriendReply {
        enabled: bool,
        content: Option<String>,
    },
    Interval { min: u64, max: u64 },
}

/// A single rule-table mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleChange {
    Insert(Rule),
    Remove(String),
    SetEnabled { keyword: String, enabled: bool },
    Replace(Vec<Rule>),
    Clear,
}

/// Immutable configuration snapshot consumed by the decision engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyConfig {
    pub rules: RuleStore,
    pub settings: Settings,
}

impl ReplyConfig {
    pub fn from_document(document: &RulesDocument) -> Self {
        let mut rules = RuleStore::from_rules(document.rules.iter().cloned());
        let settings = Settings::from_record(&document.settings);

        // Older documents carry the reply only in the settings section
        if let Some(content) = document.settings.new_friend_reply_content.as_deref() {
            if rules.get(NEW_FRIEND_KEYWORD).is_none() && !content.trim().is_empty() {
                rules.insert(Rule::new(NEW_FRIEND_KEYWORD, content));
            }
        }

        Self { rules, settings }
    }

    pub fn to_document(&self) -> RulesDocument {
        let mut settings = self.settings.to_record();
        settings.new_friend_reply_content = self
            .rules
            .new_friend_reply()
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        RulesDocument {
            rules: self.rules.rules().to_vec(),
            settings,
            last_update: String::new(),
        }
    }

    pub fn apply_settings(&mut self, change: SettingsChange) {
        let settings = &mut self.settings;
        match change {
            SettingsChange::RuleReply(on) => settings.rule_reply_enabled = on,
            SettingsChange::ReplyAllFriends(on) => settings.reply_all_friends = on,
            SettingsChange::ReplyAllGroups(on) => settings.reply_all_groups = on,
            SettingsChange::SpecificFriends { enabled, ids } => {
                settings.specific_friends_enabled = enabled;
                if let Some(ids) = ids {
                    settings.specific_friends = ids.into_iter().collect();
                }
            }
            SettingsChange::SpecificGroups { enabled, ids } => {
                settings.specific_groups_enabled = enabled;
                if let Some(ids) = ids {
                    settings.specific_groups = ids.into_iter().collect();
                }
            }
            SettingsChange::ExactMatch(on) => settings.set_exact_match(on),
            SettingsChange::FuzzyMatch(on) => settings.set_fuzzy_match(on),
            SettingsChange::Ai(backend) => {
                settings.ai_enabled = backend.is_some();
                settings.ai_backend = backend.unwrap_or_default();
            }
            SettingsChange::NewFriendReply { enabled, content } => {
                settings.new_friend_reply = enabled;
                if let Some(content) = content.filter(|c| enabled && !c.trim().is_empty()) {
                    self.rules
                        .upsert_in_place(Rule::new(NEW_FRIEND_KEYWORD, content));
                }
            }
            SettingsChange::Interval { min, max } => {
                settings.interval = DelayRange::new(min, max);
            }
        }
    }

    pub fn apply_rules(&mut self, change: RuleChange) {
        match change {
            RuleChange::Insert(rule) => self.rules.insert(rule),
            RuleChange::Remove(keyword) => {
                self.rules.remove(&keyword);
            }
            RuleChange::SetEnabled { keyword, enabled } => {
                self.rules.set_enabled(&keyword, enabled);
            }
            RuleChange::Replace(rules) => self.rules = RuleStore::from_rules(rules),
            RuleChange::Clear => self.rules.clear(),
        }
    }
}

/// Owner of the current [`ReplyConfig`] snapshot
pub struct ReplyConfigStore {
    tx: watch::Sender<Arc<ReplyConfig>>,
    repo: RulesRepository,
}

impl ReplyConfigStore {
    /// Load the rules document and publish the first snapshot
    pub async fn load(repo: RulesRepository) -> Result<Self> {
        let loaded = repo.load().await?;
        let config = ReplyConfig::from_document(&loaded.document);
        info!(
            rules = config.rules.len(),
            reinitialised = loaded.reinitialised,
            "Reply configuration loaded"
        );
        let (tx, _) = watch::channel(Arc::new(config));
        Ok(Self { tx, repo })
    }

    pub fn snapshot(&self) -> Arc<ReplyConfig> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ReplyConfig>> {
        self.tx.subscribe()
    }

    pub async fn apply_settings(&self, change: SettingsChange) -> Arc<ReplyConfig> {
        let mut next = (*self.snapshot()).clone();
        next.apply_settings(change);
        self.publish(next).await
    }

    pub async fn apply_rules(&self, change: RuleChange) -> Arc<ReplyConfig> {
        let mut next = (*self.snapshot()).clone();
        next.apply_rules(change);
        self.publish(next).await
    }

    /// Persist then publish; a failed write keeps the in-memory snapshot authoritative
    async fn publish(&self, next: ReplyConfig) -> Arc<ReplyConfig> {
        if let Err(e) = self.repo.save(&next.to_document()).await {
            error!(error = %e, "Failed to persist reply configuration");
        }
        let next = Arc::new(next);
        self.tx.send_replace(next.clone());
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatpilot_storage::{FileStorage, LocalStorage};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.rule_reply_enabled);
        assert!(settings.reply_all_friends);
        assert!(settings.reply_all_groups);
        assert!(settings.fuzzy_match);
        assert!(!settings.exact_match);
        assert_eq!(settings.ai_backend(), None);
        assert_eq!(settings.interval, DelayRange::new(1, 5));
    }

    #[test]
    fn test_match_modes_are_exclusive() {
        let mut config = ReplyConfig::default();
        config.apply_settings(SettingsChange::ExactMatch(true));
        assert!(config.settings.exact_match);
        assert!(!config.settings.fuzzy_match);

        config.apply_settings(SettingsChange::FuzzyMatch(true));
        assert!(config.settings.fuzzy_match);
        assert!(!config.settings.exact_match);

        config.apply_settings(SettingsChange::FuzzyMatch(false));
        assert!(!config.settings.fuzzy_match);
        assert!(!config.settings.exact_match);
    }

    #[test]
    fn test_ai_backend_is_exclusive() {
        let mut config = ReplyConfig::default();
        config.apply_settings(SettingsChange::Ai(Some(AiBackend::Assistant)));
        let record = config.settings.to_record();
        assert!(record.ai_reply_enabled);
        assert!(record.assistant_reply_enabled);
        assert!(!record.model_reply_enabled);

        // AI on without a sub-mode falls back to the large model
        let mut record = SettingsRecord::default();
        record.ai_reply_enabled = true;
        assert_eq!(
            Settings::from_record(&record).ai_backend(),
            Some(AiBackend::LargeModel)
        );
    }

    #[test]
    fn test_interval_is_clamped() {
        let mut config = ReplyConfig::default();
        config.apply_settings(SettingsChange::Interval { min: 6, max: 2 });
        assert_eq!(config.settings.interval, DelayRange::new(6, 6));
    }

    #[test]
    fn test_new_friend_reply_installs_rule() {
        let mut config = ReplyConfig::default();
        config.apply_rules(RuleChange::Insert(Rule::new("a", "1")));
        config.apply_rules(RuleChange::Insert(Rule::new(NEW_FRIEND_KEYWORD, "old")));
        config.apply_rules(RuleChange::Insert(Rule::new("b", "2")));
        config.apply_settings(SettingsChange::NewFriendReply {
            enabled: true,
            content: Some("welcome".to_string()),
        });

        assert!(config.settings.new_friend_reply);
        assert_eq!(config.rules.rules()[1].reply, "welcome");
        assert_eq!(
            config.to_document().settings.new_friend_reply_content.as_deref(),
            Some("welcome")
        );
    }

    #[test]
    fn test_scope_allows() {
        let mut settings = Settings::default();
        settings.reply_all_friends = false;
        settings.specific_friends_enabled = true;
        settings.specific_friends.insert("wxid_vip".to_string());
        assert!(settings.allows_friend("wxid_vip"));
        assert!(!settings.allows_friend("wxid_other"));

        settings.specific_friends_enabled = false;
        assert!(!settings.allows_friend("wxid_vip"));
    }

    #[tokio::test]
    async fn test_store_persists_and_publishes() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn FileStorage> = Arc::new(LocalStorage::from_path(dir.path()).unwrap());
        let store = ReplyConfigStore::load(RulesRepository::new(storage.clone()))
            .await
            .unwrap();
        let mut rx = store.subscribe();

        store
            .apply_rules(RuleChange::Insert(Rule::new("hello", "world")))
            .await;
        store.apply_settings(SettingsChange::RuleReply(true)).await;

        assert!(rx.has_changed().unwrap());
        let current = rx.borrow_and_update().clone();
        assert!(current.settings.rule_reply_enabled);
        assert_eq!(current.rules.len(), 1);

        let reloaded = ReplyConfigStore::load(RulesRepository::new(storage))
            .await
            .unwrap();
        assert_eq!(*reloaded.snapshot(), *current);
    }

    #[tokio::test]
    async fn test_store_loads_when_writes_fail() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("auto_reply_rules.json.tmp")).unwrap();
        let storage: Arc<dyn FileStorage> = Arc::new(LocalStorage::from_path(dir.path()).unwrap());

        let store = ReplyConfigStore::load(RulesRepository::new(storage))
            .await
            .unwrap();
        assert!(!store.snapshot().settings.rule_reply_enabled);

        // Changes still apply in memory
        let next = store.apply_settings(SettingsChange::RuleReply(true)).await;
        assert!(next.settings.rule_reply_enabled);
        assert!(store.snapshot().settings.rule_reply_enabled);
    }
}
