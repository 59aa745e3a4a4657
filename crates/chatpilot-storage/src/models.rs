//! Persisted data models

use chatpilot_common::types::{CampaignId, DelayRange, Pid};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

// ============================================================================
// Rules document
// ============================================================================

/// Keyword that the client posts when a new friend accepts a request
pub const NEW_FRIEND_KEYWORD: &str = "我通过了你的朋友验证请求";

/// A keyword to reply rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub reply: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleRecord {
    pub fn new(keyword: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            reply: reply.into(),
            enabled: true,
        }
    }
}

/// Persisted form of the scope, match and AI switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsRecord {
    #[serde(default)]
    pub rule_reply_enabled: bool,
    #[serde(default = "default_true")]
    pub reply_friend_enabled: bool,
    #[serde(default = "default_true")]
    pub reply_group_enabled: bool,
    #[serde(default)]
    pub specific_friend_enabled: bool,
    #[serde(default)]
    pub specific_group_enabled: bool,
    #[serde(default)]
    pub specific_friends: Vec<String>,
    #[serde(default)]
    pub specific_groups: Vec<String>,
    #[serde(default)]
    pub ai_reply_enabled: bool,
    #[serde(default)]
    pub assistant_reply_enabled: bool,
    #[serde(default)]
    pub model_reply_enabled: bool,
    #[serde(default)]
    pub new_friend_reply_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_friend_reply_content: Option<String>,
    #[serde(default = "default_true")]
    pub fuzzy_match_enabled: bool,
    #[serde(default)]
    pub exact_match_enabled: bool,
    #[serde(default = "default_min_interval", deserialize_with = "lenient_u64")]
    pub min_interval: u64,
    #[serde(default = "default_max_interval", deserialize_with = "lenient_u64")]
    pub max_interval: u64,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            rule_reply_enabled: false,
            reply_friend_enabled: true,
            reply_group_enabled: true,
            specific_friend_enabled: false,
            specific_group_enabled: false,
            specific_friends: Vec::new(),
            specific_groups: Vec::new(),
            ai_reply_enabled: false,
            assistant_reply_enabled: false,
            model_reply_enabled: false,
            new_friend_reply_enabled: false,
            new_friend_reply_content: None,
            fuzzy_match_enabled: true,
            exact_match_enabled: false,
            min_interval: default_min_interval(),
            max_interval: default_max_interval(),
        }
    }
}

impl SettingsRecord {
    /// Reply interval with the upper bound clamped to the lower one
    pub fn interval(&self) -> DelayRange {
        DelayRange::new(self.min_interval, self.max_interval)
    }
}

fn default_true() -> bool {
    true
}

fn default_min_interval() -> u64 {
    1
}

fn default_max_interval() -> u64 {
    5
}

/// Accepts `3`, `"3"`, `" 3 "` and treats unparseable or negative values as zero
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Text(String),
    }

    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Unsigned(v) => v,
        NumberOrString::Signed(v) => v.max(0) as u64,
        NumberOrString::Float(v) => {
            if v.is_finite() && v > 0.0 {
                v as u64
            } else {
                0
            }
        }
        NumberOrString::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(|v| v.max(0) as u64)
            .unwrap_or(0),
    })
}

/// The rules/settings document stored as `auto_reply_rules.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
    #[serde(default)]
    pub settings: SettingsRecord,
    #[serde(default)]
    pub last_update: String,
}

impl Default for RulesDocument {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            settings: SettingsRecord::default(),
            last_update: local_timestamp(),
        }
    }
}

/// Timestamp format used by `last_update`
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ============================================================================
// Message logs
// ============================================================================

/// Kind of outgoing message recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingKind {
    AutoReply,
    AiReply,
    Campaign,
    Forward,
}

impl std::fmt::Display for OutgoingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutgoingKind::AutoReply => write!(f, "auto_reply"),
            OutgoingKind::AiReply => write!(f, "ai_reply"),
            OutgoingKind::Campaign => write!(f, "campaign"),
            OutgoingKind::Forward => write!(f, "forward"),
        }
    }
}

/// One section of the outgoing message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub content: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    pub receiver: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: OutgoingKind,
    #[serde(default = "default_direction")]
    pub direction: String,
}

impl OutgoingMessage {
    pub fn new(receiver: impl Into<String>, content: impl Into<String>, kind: OutgoingKind) -> Self {
        Self {
            content: content.into(),
            sender: default_sender(),
            receiver: receiver.into(),
            timestamp: Utc::now(),
            kind,
            direction: default_direction(),
        }
    }
}

fn default_sender() -> String {
    "system".to_string()
}

fn default_direction() -> String {
    "outgoing".to_string()
}

/// One inbound message kept for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRecord {
    pub timestamp: DateTime<Utc>,
    pub wxid: String,
    pub content: String,
    #[serde(default)]
    pub account_wxid: String,
    #[serde(default)]
    pub account_nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
}

// ============================================================================
// Campaigns
// ============================================================================

/// Campaign status
///
/// Moves forward only: `Waiting -> Running -> {Done, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Waiting,
    Running,
    Done,
    Failed,
}

impl CampaignStatus {
    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        matches!(
            (self, next),
            (CampaignStatus::Waiting, CampaignStatus::Running)
                | (CampaignStatus::Running, CampaignStatus::Done)
                | (CampaignStatus::Running, CampaignStatus::Failed)
        )
    }

    /// Only waiting campaigns can be edited
    pub fn is_editable(self) -> bool {
        self == CampaignStatus::Waiting
    }

    /// Waiting and done campaigns can be deleted by the user
    pub fn is_deletable(self) -> bool {
        matches!(self, CampaignStatus::Waiting | CampaignStatus::Done)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Done | CampaignStatus::Failed)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Waiting => write!(f, "waiting"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Done => write!(f, "done"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(CampaignStatus::Waiting),
            "running" => Ok(CampaignStatus::Running),
            "done" => Ok(CampaignStatus::Done),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// A campaign recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTarget {
    pub wxid: String,
    #[serde(default)]
    pub name: String,
}

impl CampaignTarget {
    pub fn new(wxid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            wxid: wxid.into(),
            name: name.into(),
        }
    }
}

/// A bulk-send campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub due_at: DateTime<Utc>,
    pub targets: Vec<CampaignTarget>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<PathBuf>,
    pub delay: DelayRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<Pid>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent_count: u32,
    #[serde(default)]
    pub failed_count: u32,
}

impl Campaign {
    /// Whether the campaign carries anything to send
    pub fn has_body(&self) -> bool {
        !self.text.trim().is_empty() || self.media_path.is_some()
    }

    /// Calculate progress percentage over the target list
    pub fn progress_percentage(&self) -> f64 {
        if self.targets.is_empty() {
            0.0
        } else {
            ((self.sent_count + self.failed_count) as f64 / self.targets.len() as f64) * 100.0
        }
    }
}

/// Campaign backlog document stored as `campaigns.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignBacklog {
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
}

// ============================================================================
// Add-friend worklist
// ============================================================================

/// Processing state of one worklist row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestStatus {
    Waiting,
    AlreadyFriend,
    NoAccount,
    Added,
    AddFailed,
}

impl std::fmt::Display for FriendRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FriendRequestStatus::Waiting => write!(f, "waiting"),
            FriendRequestStatus::AlreadyFriend => write!(f, "already_friend"),
            FriendRequestStatus::NoAccount => write!(f, "no_account"),
            FriendRequestStatus::Added => write!(f, "added"),
            FriendRequestStatus::AddFailed => write!(f, "add_failed"),
        }
    }
}

/// One row of the add-friend worklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequestRecord {
    pub phone: String,
    #[serde(default)]
    pub greeting: String,
    pub status: FriendRequestStatus,
    #[serde(default, alias = "v3")]
    pub resolved_id: String,
    #[serde(default, alias = "nickname")]
    pub resolved_nickname: String,
    #[serde(default)]
    pub remark: String,
}

impl FriendRequestRecord {
    pub fn new(phone: impl Into<String>, greeting: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            greeting: greeting.into(),
            status: FriendRequestStatus::Waiting,
            resolved_id: String::new(),
            resolved_nickname: String::new(),
            remark: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_settings_lenient_intervals() {
        let json = r#"{"min_interval": "2", "max_interval": 7}"#;
        let settings: SettingsRecord = serde_json::from_str(json).unwrap();
        assert_eq!(settings.min_interval, 2);
        assert_eq!(settings.max_interval, 7);

        let json = r#"{"min_interval": "abc", "max_interval": "-4"}"#;
        let settings: SettingsRecord = serde_json::from_str(json).unwrap();
        assert_eq!(settings.min_interval, 0);
        assert_eq!(settings.max_interval, 0);

        let json = r#"{"min_interval": "9", "max_interval": "3"}"#;
        let settings: SettingsRecord = serde_json::from_str(json).unwrap();
        assert_eq!(settings.interval(), DelayRange::new(9, 9));
    }

    #[test]
    fn test_settings_defaults() {
        let settings: SettingsRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SettingsRecord::default());
        assert!(!settings.rule_reply_enabled);
        assert!(settings.reply_friend_enabled);
        assert!(settings.reply_group_enabled);
        assert!(settings.fuzzy_match_enabled);
        assert!(!settings.exact_match_enabled);
        assert_eq!(settings.interval(), DelayRange::new(1, 5));
    }

    #[test]
    fn test_campaign_status_transitions() {
        use CampaignStatus::*;

        assert!(Waiting.can_transition_to(Running));
        assert!(Running.can_transition_to(Done));
        assert!(Running.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Waiting));
        assert!(!Done.can_transition_to(Running));
        assert!(!Waiting.can_transition_to(Done));

        assert!(Waiting.is_editable());
        assert!(!Running.is_editable());
        assert!(Done.is_deletable());
        assert!(!Running.is_deletable());
        assert_eq!("running".parse::<CampaignStatus>().unwrap(), Running);
    }

    #[test]
    fn test_outgoing_message_serializes_type_field() {
        let msg = OutgoingMessage::new("wxid_a", "hello", OutgoingKind::AiReply);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ai_reply");
        assert_eq!(value["sender"], "system");
        assert_eq!(value["direction"], "outgoing");
    }

    #[test]
    fn test_friend_request_aliases() {
        let json = r#"{"phone": "13800000000", "status": "waiting", "v3": "v3_abc", "nickname": "Bob"}"#;
        let record: FriendRequestRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.resolved_id, "v3_abc");
        assert_eq!(record.resolved_nickname, "Bob");
        assert_eq!(record.status, FriendRequestStatus::Waiting);
    }
}
