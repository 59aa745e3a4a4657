//! Monitor registry - at most one inbound monitor per account process

use crate::facade::{ChatClient, InboundEnvelope, MonitorSink};
use chatpilot_common::types::{AccountIdentity, AccountInfo, Pid};
use chatpilot_common::Error;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Monitor errors
#[derive(Debug, ThisError)]
pub enum MonitorError {
    #[error("failed to discover accounts: {0}")]
    Discovery(Error),

    #[error("failed to start monitor for process {pid}: {source}")]
    Start { pid: Pid, source: Error },
}

impl From<MonitorError> for Error {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::Discovery(e) => e,
            MonitorError::Start { source, .. } => source,
        }
    }
}

/// A live monitor owned by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorHandle {
    pub account: AccountIdentity,
    pub started_at: DateTime<Utc>,
}

/// Owns every live monitor, keyed by process id
pub struct MonitorRegistry {
    client: Arc<dyn ChatClient>,
    inbound: mpsc::Sender<InboundEnvelope>,
    handles: BTreeMap<Pid, MonitorHandle>,
    running: bool,
}

impl MonitorRegistry {
    pub fn new(client: Arc<dyn ChatClient>, inbound: mpsc::Sender<InboundEnvelope>) -> Self {
        Self {
            client,
            inbound,
            handles: BTreeMap::new(),
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.handles.keys().copied().collect()
    }

    pub fn handle(&self, pid: Pid) -> Option<&MonitorHandle> {
        self.handles.get(&pid)
    }

    /// Start a monitor for the account unless one already exists.
    ///
    /// Returns `true` when a new monitor was started.
    pub async fn ensure_monitor(&mut self, account: &AccountInfo) -> Result<bool, MonitorError> {
        if self.handles.contains_key(&account.pid) {
            return Ok(false);
        }

        let identity = AccountIdentity::from(account);
        let sink = MonitorSink::new(identity.clone(), self.inbound.clone());
        self.client
            .start_message_monitor(account.pid, sink)
            .await
            .map_err(|source| MonitorError::Start {
                pid: account.pid,
                source,
            })?;

        info!(pid = account.pid, nickname = %account.nickname, "Message monitor started");
        self.handles.insert(
            account.pid,
            MonitorHandle {
                account: identity,
                started_at: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Monitor every logged-in account; returns how many monitors are live.
    ///
    /// Handles whose process disappeared are stopped and dropped.
    pub async fn start_all(&mut self) -> Result<usize, MonitorError> {
        let accounts = self
            .client
            .list_logged_in_accounts()
            .await
            .map_err(MonitorError::Discovery)?;

        let live: HashSet<Pid> = accounts.iter().map(|a| a.pid).collect();
        let vanished: Vec<Pid> = self
            .handles
            .keys()
            .filter(|pid| !live.contains(pid))
            .copied()
            .collect();
        for pid in vanished {
            self.stop(pid).await;
        }

        for account in &accounts {
            if let Err(e) = self.ensure_monitor(account).await {
                warn!(error = %e, "Monitor start failed");
            }
        }

        self.running = !self.handles.is_empty();
        if self.running {
            debug!(monitors = self.handles.len(), "Monitor registry running");
        } else {
            warn!(accounts = accounts.len(), "No message monitor could be started");
        }
        Ok(self.handles.len())
    }

    async fn stop(&mut self, pid: Pid) {
        if self.handles.remove(&pid).is_some() {
            if let Err(e) = self.client.stop_message_monitor(pid).await {
                error!(pid, error = %e, "Failed to stop message monitor");
            }
            info!(pid, "Message monitor stopped");
        }
    }

    /// Stop and discard every monitor
    pub async fn stop_all(&mut self) {
        for pid in self.pids() {
            self.stop(pid).await;
        }
        self.running = false;
    }

    /// Restart monitors when the registry is not running; a healthy registry is left alone
    pub async fn health_check(&mut self) -> bool {
        if self.running {
            return true;
        }
        debug!("Monitor registry not running, restarting monitors");
        match self.start_all().await {
            Ok(_) => self.running,
            Err(e) => {
                warn!(error = %e, "Monitor health check failed");
                false
            }
        }
    }
}
