//! Automation facade
//!
//! The engine never touches the chat client directly. Everything it needs
//! (account discovery, sends, contact enumeration and the inbound message
//! monitor) goes through [`ChatClient`].

use async_trait::async_trait;
use chatpilot_common::types::{AccountIdentity, AccountInfo, ContactDirectory, GroupMember, Pid};
use chatpilot_common::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::trace;

/// Progress reporting for long enumerations: `(current, total)`
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// A message as produced by a client monitor, before normalisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(alias = "wxid")]
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            member_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_member(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }
}

/// A raw message stamped with the account that received it
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub account: AccountIdentity,
    pub message: RawMessage,
}

/// Hand-off from a monitor task to the engine's inbound channel.
///
/// Every delivered message is stamped with the owning account's identity.
/// Delivery waits when the channel is full.
#[derive(Clone)]
pub struct MonitorSink {
    account: AccountIdentity,
    tx: mpsc::Sender<InboundEnvelope>,
}

impl MonitorSink {
    pub fn new(account: AccountIdentity, tx: mpsc::Sender<InboundEnvelope>) -> Self {
        Self { account, tx }
    }

    pub fn pid(&self) -> Pid {
        self.account.pid
    }

    pub fn account(&self) -> &AccountIdentity {
        &self.account
    }

    /// Forward one message; returns `false` once the engine has gone away
    pub async fn deliver(&self, message: RawMessage) -> bool {
        let envelope = InboundEnvelope {
            account: self.account.clone(),
            message,
        };
        self.tx.send(envelope).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result of probing a phone number for a friend request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactProbe {
    /// `v3_` ticket for strangers, a plain id for existing friends
    pub id: String,
    #[serde(default)]
    pub nickname: String,
}

/// The functional contract of the automation library
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Discover every logged-in client process
    async fn list_logged_in_accounts(&self) -> Result<Vec<AccountInfo>>;

    /// Send a text message; `Ok(false)` means the client refused it
    async fn send_text(&self, pid: Pid, receiver: &str, text: &str) -> Result<bool>;

    /// Send an image or video
    async fn send_media(&self, pid: Pid, receiver: &str, path: &Path) -> Result<bool>;

    /// Send an arbitrary file
    async fn send_file(&self, pid: Pid, receiver: &str, path: &Path) -> Result<bool> {
        self.send_media(pid, receiver, path).await
    }

    /// Enumerate contacts, friends and groups
    async fn fetch_contacts(&self, pid: Pid, progress: &ProgressFn) -> Result<ContactDirectory>;

    /// Enumerate the members of one group
    async fn fetch_group_members(
        &self,
        pid: Pid,
        group_id: &str,
        progress: &ProgressFn,
    ) -> Result<Vec<GroupMember>>;

    /// Start pushing inbound messages for `pid` into `sink`
    async fn start_message_monitor(&self, pid: Pid, sink: MonitorSink) -> Result<()>;

    /// Stop the monitor for `pid`
    async fn stop_message_monitor(&self, pid: Pid) -> Result<()>;

    /// Look up a phone number
    async fn search_contact(&self, pid: Pid, phone: &str) -> Result<Option<ContactProbe>>;

    /// Send a friend request using a `v3_` ticket or a plain id
    async fn add_friend(&self, pid: Pid, target: &str, greeting: &str) -> Result<bool>;
}

/// Wraps a client so that every send to one account process runs alone.
///
/// Sends to different processes still proceed in parallel.
pub struct SerializedClient {
    inner: Arc<dyn ChatClient>,
    locks: std::sync::Mutex<HashMap<Pid, Arc<Mutex<()>>>>,
}

impl SerializedClient {
    pub fn new(inner: Arc<dyn ChatClient>) -> Self {
        Self {
            inner,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, pid: Pid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(pid).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        trace!(pid, "Acquired send lock");
        guard
    }
}

#[async_trait]
impl ChatClient for SerializedClient {
    async fn list_logged_in_accounts(&self) -> Result<Vec<AccountInfo>> {
        self.inner.list_logged_in_accounts().await
    }

    async fn send_text(&self, pid: Pid, receiver: &str, text: &str) -> Result<bool> {
        let _guard = self.lock(pid).await;
        self.inner.send_text(pid, receiver, text).await
    }

    async fn send_media(&self, pid: Pid, receiver: &str, path: &Path) -> Result<bool> {
        let _guard = self.lock(pid).await;
        self.inner.send_media(pid, receiver, path).await
    }

    async fn send_file(&self, pid: Pid, receiver: &str, path: &Path) -> Result<bool> {
        let _guard = self.lock(pid).await;
        self.inner.send_file(pid, receiver, path).await
    }

    async fn fetch_contacts(&self, pid: Pid, progress: &ProgressFn) -> Result<ContactDirectory> {
        self.inner.fetch_contacts(pid, progress).await
    }

    async fn fetch_group_members(
        &self,
        pid: Pid,
        group_id: &str,
        progress: &ProgressFn,
    ) -> Result<Vec<GroupMember>> {
        self.inner.fetch_group_members(pid, group_id, progress).await
    }

    async fn start_message_monitor(&self, pid: Pid, sink: MonitorSink) -> Result<()> {
        self.inner.start_message_monitor(pid, sink).await
    }

    async fn stop_message_monitor(&self, pid: Pid) -> Result<()> {
        self.inner.stop_message_monitor(pid).await
    }

    async fn search_contact(&self, pid: Pid, phone: &str) -> Result<Option<ContactProbe>> {
        self.inner.search_contact(pid, phone).await
    }

    async fn add_friend(&self, pid: Pid, target: &str, greeting: &str) -> Result<bool> {
        let _guard = self.lock(pid).await;
        self.inner.add_friend(pid, target, greeting).await
    }
}
