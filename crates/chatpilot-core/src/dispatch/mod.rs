//! Delayed dispatch of outgoing messages

pub mod coordinator;

pub use coordinator::{DispatchCoordinator, DispatchError};

use chatpilot_common::types::{DirectiveId, Pid};
use chatpilot_storage::models::OutgoingKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// An instruction to send one message to one receiver after a delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub id: DirectiveId,
    /// Sending account; resolved at fire time when absent
    pub pid: Option<Pid>,
    pub receiver: String,
    /// Text, or a path to a file on disk
    pub content: String,
    pub delay: Duration,
    pub kind: OutgoingKind,
}

impl Directive {
    pub fn new(receiver: impl Into<String>, content: impl Into<String>, kind: OutgoingKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            pid: None,
            receiver: receiver.into(),
            content: content.into(),
            delay: Duration::ZERO,
            kind,
        }
    }

    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// What a send call actually transmits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media(PathBuf),
    File(PathBuf),
}

impl Payload {
    /// Existing image path: media. Any other existing file: file. Otherwise text.
    pub async fn classify(content: &str, image_extensions: &[String]) -> Self {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Payload::Text(content.to_string());
        }

        let path = Path::new(trimmed);
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Payload::Text(content.to_string());
        }

        if is_image(path, image_extensions) {
            Payload::Media(path.to_path_buf())
        } else {
            Payload::File(path.to_path_buf())
        }
    }

    /// Content recorded in the outgoing log
    pub fn describe(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Media(path) | Payload::File(path) => path.display().to_string(),
        }
    }
}

/// Case-insensitive extension check; extensions are given with the leading dot
pub fn is_image(path: &Path, image_extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = format!(".{}", ext.to_lowercase());
    image_extensions.iter().any(|e| e.to_lowercase() == ext)
}
