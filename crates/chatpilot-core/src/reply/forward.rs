//! Reserved assistant forwarding path
//!
//! Prompts relayed to the assistant contact remember who asked. Whatever
//! the assistant sends back goes verbatim to the last remembered asker.

use crate::dispatch::Directive;
use crate::reply::event::InboundEvent;
use chatpilot_common::types::Pid;
use chatpilot_storage::models::OutgoingKind;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Whoever last asked the assistant something
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asker {
    pub pid: Pid,
    pub sender: String,
    pub group_id: Option<String>,
}

impl Asker {
    /// Where a forwarded answer goes: the group when there is one
    pub fn target(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.sender)
    }
}

/// Routes assistant replies back to the asker
#[derive(Debug)]
pub struct AssistantForwarder {
    assistant_id: String,
    last_asker: Mutex<Option<Asker>>,
}

impl AssistantForwarder {
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            last_asker: Mutex::new(None),
        }
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    pub fn is_assistant(&self, sender: &str) -> bool {
        sender == self.assistant_id
    }

    pub fn remember(&self, asker: Asker) {
        debug!(target_id = %asker.target(), "Remembering assistant asker");
        *self.lock() = Some(asker);
    }

    pub fn last_asker(&self) -> Option<Asker> {
        self.lock().clone()
    }

    /// Build the forward for a message from the assistant, if anyone asked
    pub fn forward(&self, event: &InboundEvent) -> Option<Directive> {
        if !self.is_assistant(&event.sender) || event.raw_content.trim().is_empty() {
            return None;
        }
        let Some(asker) = self.last_asker() else {
            warn!("Assistant replied but nobody is waiting for an answer");
            return None;
        };
        Some(
            Directive::new(asker.target(), &event.raw_content, OutgoingKind::Forward)
                .with_pid(asker.pid),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Asker>> {
        self.last_asker.lock().unwrap_or_else(|e| e.into_inner())
    }
}
