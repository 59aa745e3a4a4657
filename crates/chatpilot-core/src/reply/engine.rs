//! Auto-reply decision engine
//!
//! Turns one [`InboundEvent`] and the current [`ReplyConfig`] snapshot into
//! a [`Decision`]: nothing, one delayed directive per matched rule, or a
//! request for AI generation.

use crate::dispatch::Directive;
use crate::reply::event::InboundEvent;
use crate::settings::{AiBackend, ReplyConfig};
use chatpilot_common::types::{DelayRange, Pid};
use chatpilot_storage::models::OutgoingKind;
use rand::Rng;
use std::fmt;
use tracing::{debug, info};

/// Why an inbound message produced no reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    RuleReplyDisabled,
    EmptyMessage,
    AssistantSender,
    OutOfScope,
    NotMentioned,
    NoMatch,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IgnoreReason::RuleReplyDisabled => "rule reply disabled",
            IgnoreReason::EmptyMessage => "empty sender or content",
            IgnoreReason::AssistantSender => "reserved assistant sender",
            IgnoreReason::OutOfScope => "sender out of scope",
            IgnoreReason::NotMentioned => "group message without mention",
            IgnoreReason::NoMatch => "no rule matched",
        };
        f.write_str(reason)
    }
}

/// A request for the AI backend to answer a message no rule matched
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    /// Account that received the message
    pub pid: Pid,
    /// Where the answer goes: the group id for group messages
    pub receiver: String,
    /// Group member who asked, for group messages
    pub member_id: Option<String>,
    pub prompt: String,
    pub backend: AiBackend,
    pub interval: DelayRange,
}

impl AiRequest {
    pub fn is_group(&self) -> bool {
        chatpilot_common::types::is_group_id(&self.receiver)
    }
}

/// Outcome of evaluating one inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Ignore(IgnoreReason),
    /// One directive per matched rule, in rule-table order
    Reply(Vec<Directive>),
    Generate(AiRequest),
}

impl Decision {
    /// Directives to schedule; empty for ignores and AI requests
    pub fn directives(&self) -> &[Directive] {
        match self {
            Decision::Reply(directives) => directives,
            _ => &[],
        }
    }
}

/// Stateless evaluator for inbound messages
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    assistant_id: String,
}

impl DecisionEngine {
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
        }
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    /// Evaluate one event against a configuration snapshot
    pub fn decide<R: Rng + ?Sized>(
        &self,
        event: &InboundEvent,
        config: &ReplyConfig,
        rng: &mut R,
    ) -> Decision {
        let settings = &config.settings;

        if !settings.rule_reply_enabled {
            return Decision::Ignore(IgnoreReason::RuleReplyDisabled);
        }
        if event.sender.is_empty() || event.content.trim().is_empty() {
            return Decision::Ignore(IgnoreReason::EmptyMessage);
        }
        if event.sender == self.assistant_id {
            return Decision::Ignore(IgnoreReason::AssistantSender);
        }

        if event.is_group() {
            if !settings.allows_group(&event.sender) {
                return Decision::Ignore(IgnoreReason::OutOfScope);
            }
            if !event.mentions_me {
                return Decision::Ignore(IgnoreReason::NotMentioned);
            }
        } else if !settings.allows_friend(&event.sender) {
            return Decision::Ignore(IgnoreReason::OutOfScope);
        }

        let mut matched = Vec::new();
        if settings.exact_match {
            matched = config.rules.exact_matches(&event.content);
        }
        if matched.is_empty() && settings.fuzzy_match {
            matched = config.rules.fuzzy_matches(&event.content);
        }

        if matched.is_empty() {
            return match settings.ai_backend() {
                Some(backend) => {
                    debug!(sender = %event.sender, ?backend, "No rule matched, delegating to AI");
                    Decision::Generate(AiRequest {
                        pid: event.account.pid,
                        receiver: event.sender.clone(),
                        member_id: event.member_id.clone(),
                        prompt: event.content.clone(),
                        backend,
                        interval: settings.interval,
                    })
                }
                None => Decision::Ignore(IgnoreReason::NoMatch),
            };
        }

        let directives: Vec<Directive> = matched
            .into_iter()
            .map(|rule| {
                Directive::new(&event.sender, &rule.reply, OutgoingKind::AutoReply)
                    .with_pid(event.account.pid)
                    .with_delay(settings.interval.sample_secs(rng))
            })
            .collect();

        info!(
            sender = %event.sender,
            pid = event.account.pid,
            replies = directives.len(),
            "Auto-reply rules matched"
        );
        Decision::Reply(directives)
    }
}
