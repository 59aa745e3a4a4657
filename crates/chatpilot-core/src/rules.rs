//! Rule store: ordered keyword to reply rules

pub use chatpilot_storage::models::RuleRecord as Rule;
use chatpilot_storage::models::NEW_FRIEND_KEYWORD;
use tracing::debug;

/// Ordered collection of rules with unique keywords.
///
/// Table order is insertion order. Inserting a keyword that already exists
/// removes the earlier rule and appends the new one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleStore {
    rules: Vec<Rule>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, applying the same uniqueness rule as `insert`
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut store = Self::new();
        for rule in rules {
            store.insert(rule);
        }
        store
    }

    pub fn insert(&mut self, rule: Rule) {
        if let Some(pos) = self.rules.iter().position(|r| r.keyword == rule.keyword) {
            debug!(keyword = %rule.keyword, "Replacing rule with duplicate keyword");
            self.rules.remove(pos);
        }
        self.rules.push(rule);
    }

    /// Update the reply of an existing keyword in place, or append a new rule
    pub fn upsert_in_place(&mut self, rule: Rule) {
        match self.rules.iter_mut().find(|r| r.keyword == rule.keyword) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn remove(&mut self, keyword: &str) -> Option<Rule> {
        let pos = self.rules.iter().position(|r| r.keyword == keyword)?;
        Some(self.rules.remove(pos))
    }

    pub fn set_enabled(&mut self, keyword: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|r| r.keyword == keyword) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn get(&self, keyword: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.keyword == keyword)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Enabled rules whose trimmed keyword equals the trimmed content, in table order
    pub fn exact_matches(&self, content: &str) -> Vec<&Rule> {
        let content = content.trim();
        self.rules
            .iter()
            .filter(|r| r.enabled && r.keyword.trim() == content)
            .collect()
    }

    /// Enabled rules whose keyword occurs in the content, case-insensitively, in table order
    pub fn fuzzy_matches(&self, content: &str) -> Vec<&Rule> {
        let content = content.trim().to_lowercase();
        self.rules
            .iter()
            .filter(|r| {
                let keyword = r.keyword.trim();
                r.enabled && !keyword.is_empty() && content.contains(&keyword.to_lowercase())
            })
            .collect()
    }

    /// Reply configured for the friend-acceptance keyword
    pub fn new_friend_reply(&self) -> Option<&str> {
        self.get(NEW_FRIEND_KEYWORD).map(|r| r.reply.as_str())
    }
}
