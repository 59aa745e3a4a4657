//! Add-friend workflow
//!
//! Works through the waiting rows of the worklist on a background task.
//! Accounts are used round-robin by row index. Pause, resume and stop are
//! honoured between rows; a request in flight always completes.

use crate::facade::{ChatClient, ContactProbe};
use crate::reply::event::InboundEvent;
use crate::status::StatusBus;
use chatpilot_common::types::{DelayRange, Pid};
use chatpilot_common::{Error, Result};
use chatpilot_storage::models::{FriendRequestRecord, FriendRequestStatus};
use chatpilot_storage::{merge_unique, FriendRequestRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// System notice sent by the client when friend requests go out too fast
pub const RATE_LIMIT_PHRASE: &str = "操作过于频繁";

/// Prefix of stranger tickets returned by a phone search
const TICKET_PREFIX: &str = "v3_";

/// Prefix of plain contact ids
const CONTACT_PREFIX: &str = "wxid_";

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowSummary {
    pub processed: usize,
    pub added: usize,
    pub failed: usize,
    pub stopped: bool,
}

struct Control {
    running: AtomicBool,
    rate_limited: AtomicBool,
    paused: watch::Sender<bool>,
    stop: std::sync::Mutex<CancellationToken>,
}

impl Control {
    fn stop_token(&self) -> CancellationToken {
        self.stop.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.stop.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        token
    }
}

/// Runs friend requests over the persisted worklist
#[derive(Clone)]
pub struct FriendWorkflow {
    client: Arc<dyn ChatClient>,
    repo: FriendRequestRepository,
    status: StatusBus,
    default_greeting: String,
    records: Arc<Mutex<Vec<FriendRequestRecord>>>,
    control: Arc<Control>,
}

impl FriendWorkflow {
    pub async fn load(
        client: Arc<dyn ChatClient>,
        repo: FriendRequestRepository,
        status: StatusBus,
        default_greeting: impl Into<String>,
    ) -> Self {
        let records = repo.load().await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to load friend worklist");
            Vec::new()
        });
        let (paused, _) = watch::channel(false);

        Self {
            client,
            repo,
            status,
            default_greeting: default_greeting.into(),
            records: Arc::new(Mutex::new(records)),
            control: Arc::new(Control {
                running: AtomicBool::new(false),
                rate_limited: AtomicBool::new(false),
                paused,
                stop: std::sync::Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Add rows, skipping phones already present; returns how many were added
    pub async fn add(&self, incoming: Vec<FriendRequestRecord>) -> usize {
        let mut records = self.records.lock().await;
        let added = merge_unique(&mut records, incoming);
        if added > 0 {
            self.persist(&records).await;
        }
        added
    }

    pub async fn records(&self) -> Vec<FriendRequestRecord> {
        self.records.lock().await.clone()
    }

    /// Drop every row; refused while a run is active
    pub async fn clear(&self) -> Result<()> {
        // Hold the running flag for the whole clear so a run cannot start midway
        if self
            .control
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidState("friend workflow is running".to_string()));
        }
        {
            let mut records = self.records.lock().await;
            records.clear();
            self.persist(&records).await;
        }
        self.control.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn persist(&self, records: &[FriendRequestRecord]) {
        if let Err(e) = self.repo.save(records).await {
            error!(error = %e, "Failed to persist friend worklist");
        }
    }

    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *self.control.paused.borrow()
    }

    pub fn pause(&self) {
        if self.is_running() {
            self.control.paused.send_replace(true);
            info!("Friend workflow paused");
        }
    }

    pub fn resume(&self) {
        self.control.paused.send_replace(false);
        info!("Friend workflow resumed");
    }

    pub fn stop(&self) {
        self.control.stop_token().cancel();
        self.control.paused.send_replace(false);
        info!("Friend workflow stop requested");
    }

    /// Start a run over the waiting rows. `delay` is in minutes.
    pub fn start(&self, accounts: Vec<Pid>, delay: DelayRange) -> Result<JoinHandle<WorkflowSummary>> {
        if accounts.is_empty() {
            return Err(Error::NoAccount);
        }
        if self
            .control
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidState("friend workflow already running".to_string()));
        }

        self.control.rate_limited.store(false, Ordering::SeqCst);
        self.control.paused.send_replace(false);
        let token = self.control.fresh_token();

        let this = self.clone();
        Ok(tokio::spawn(async move {
            let summary = this.run(accounts, delay, token).await;
            this.control.running.store(false, Ordering::SeqCst);
            this.status.info(format!(
                "Friend requests finished: {} processed, {} added, {} failed",
                summary.processed, summary.added, summary.failed
            ));
            summary
        }))
    }

    /// Stop a running workflow the first time the client reports rate limiting.
    ///
    /// Returns `true` when this event triggered the stop.
    pub fn observe(&self, event: &InboundEvent) -> bool {
        if !self.is_running() || !event.raw_content.contains(RATE_LIMIT_PHRASE) {
            return false;
        }
        if self
            .control
            .rate_limited
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        warn!(sender = %event.sender, "Client reports rate limiting, stopping friend requests");
        self.stop();
        self.status
            .blocking("Friend requests are being sent too frequently. The workflow has been stopped.");
        true
    }

    async fn run(
        &self,
        accounts: Vec<Pid>,
        delay: DelayRange,
        token: CancellationToken,
    ) -> WorkflowSummary {
        let pending: Vec<usize> = {
            let records = self.records.lock().await;
            records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.status == FriendRequestStatus::Waiting)
                .map(|(idx, _)| idx)
                .collect()
        };
        info!(rows = pending.len(), accounts = accounts.len(), "Friend workflow started");

        let mut summary = WorkflowSummary::default();
        for (n, &idx) in pending.iter().enumerate() {
            if n > 0 {
                let minutes = delay.sample(&mut rand::thread_rng());
                debug!(minutes, "Waiting before next friend request");
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(minutes.saturating_mul(60))) => {}
                }
            }
            if !self.wait_while_paused(&token).await {
                summary.stopped = true;
                break;
            }

            let pid = accounts[idx % accounts.len()];
            let Some(record) = self.records.lock().await.get(idx).cloned() else {
                break;
            };
            let updated = self.process(pid, record).await;
            match updated.status {
                FriendRequestStatus::Added => summary.added += 1,
                FriendRequestStatus::AddFailed => summary.failed += 1,
                _ => {}
            }
            summary.processed += 1;

            let mut records = self.records.lock().await;
            if let Some(slot) = records.get_mut(idx) {
                *slot = updated;
            }
            self.persist(&records).await;
        }

        if token.is_cancelled() {
            summary.stopped = true;
        }
        info!(?summary, "Friend workflow ended");
        summary
    }

    /// Returns `false` when a stop was requested
    async fn wait_while_paused(&self, token: &CancellationToken) -> bool {
        let mut paused = self.control.paused.subscribe();
        loop {
            if token.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn process(&self, pid: Pid, mut record: FriendRequestRecord) -> FriendRequestRecord {
        let phone = record.phone.trim().to_string();
        let greeting = if record.greeting.trim().is_empty() {
            self.default_greeting.clone()
        } else {
            record.greeting.clone()
        };

        // Group members arrive with their contact id already known
        let preresolved = [record.resolved_id.as_str(), phone.as_str()]
            .into_iter()
            .find(|id| id.starts_with(CONTACT_PREFIX))
            .map(str::to_string);

        let from_member = preresolved.is_some();
        let probe = match preresolved {
            Some(id) => Some(ContactProbe {
                id,
                nickname: record.resolved_nickname.clone(),
            }),
            None => match self.client.search_contact(pid, &phone).await {
                Ok(probe) => probe,
                Err(e) => {
                    warn!(pid, phone = %phone, error = %e, "Contact search failed");
                    None
                }
            },
        };

        let Some(probe) = probe.filter(|p| !p.id.is_empty()) else {
            record.status = FriendRequestStatus::NoAccount;
            return record;
        };
        record.resolved_id = probe.id.clone();
        if !probe.nickname.is_empty() {
            record.resolved_nickname = probe.nickname.clone();
        }

        if !from_member && !probe.id.starts_with(TICKET_PREFIX) {
            record.status = FriendRequestStatus::AlreadyFriend;
            return record;
        }

        record.status = match self.client.add_friend(pid, &probe.id, &greeting).await {
            Ok(true) => {
                info!(pid, phone = %phone, "Friend request sent");
                FriendRequestStatus::Added
            }
            Ok(false) => FriendRequestStatus::AddFailed,
            Err(e) => {
                warn!(pid, phone = %phone, error = %e, "Friend request failed");
                record.remark = e.to_string();
                FriendRequestStatus::AddFailed
            }
        };
        record
    }
}
