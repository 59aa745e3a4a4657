//! Inbound message events

use crate::facade::InboundEnvelope;
use chatpilot_common::types::{is_group_id, AccountIdentity};
use chatpilot_storage::models::InboundRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// A normalised inbound message, consumed once by the decision engine
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub sender: String,
    pub raw_content: String,
    /// Decoded content with any mention of this account stripped
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub account: AccountIdentity,
    pub member_id: Option<String>,
    pub mentions_me: bool,
}

fn title_pattern() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| {
        Regex::new(r"(?s)<title>(.*?)</title>").unwrap_or_else(|e| unreachable!("{}", e))
    })
}

/// Text of the first `<title>` element of a rich payload
pub fn extract_title(content: &str) -> Option<String> {
    title_pattern()
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

impl InboundEvent {
    pub fn from_envelope(envelope: InboundEnvelope) -> Self {
        let InboundEnvelope { account, message } = envelope;
        let raw_content = message.content;
        let mut content = extract_title(&raw_content).unwrap_or_else(|| raw_content.clone());

        let mut mentions_me = false;
        if is_group_id(&message.sender) {
            mentions_me = raw_content.contains("<atuserlist>");
            for marker in [&account.nickname, &account.wxid] {
                if marker.is_empty() {
                    continue;
                }
                let tag = format!("@{}", marker);
                if content.contains(&tag) {
                    mentions_me = true;
                    content = content.replace(&tag, "").trim().to_string();
                    break;
                }
            }
        }

        Self {
            sender: message.sender,
            raw_content,
            content,
            timestamp: message.timestamp,
            account,
            member_id: message.member_id.filter(|m| !m.is_empty()),
            mentions_me,
        }
    }

    pub fn is_group(&self) -> bool {
        is_group_id(&self.sender)
    }

    /// History entry for the inbound log
    pub fn to_record(&self) -> InboundRecord {
        InboundRecord {
            timestamp: self.timestamp,
            wxid: self.sender.clone(),
            content: self.content.clone(),
            account_wxid: self.account.wxid.clone(),
            account_nickname: self.account.nickname.clone(),
            member_id: self.member_id.clone(),
        }
    }
}
