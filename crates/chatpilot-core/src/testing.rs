//! In-memory chat client used by the engine's tests

use crate::facade::{ChatClient, ContactProbe, MonitorSink, ProgressFn, RawMessage};
use async_trait::async_trait;
use chatpilot_common::types::{AccountInfo, Contact, ContactDirectory, GroupMember, Pid};
use chatpilot_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentPayload {
    Text(String),
    Media(PathBuf),
    File(PathBuf),
    FriendRequest { target: String, greeting: String },
}

#[derive(Debug, Clone)]
pub struct SendCall {
    pub pid: Pid,
    pub receiver: String,
    pub payload: SentPayload,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    accounts: Vec<AccountInfo>,
    calls: Vec<SendCall>,
    failing_receivers: HashSet<String>,
    failing_monitors: HashSet<Pid>,
    monitors: HashMap<Pid, MonitorSink>,
    monitor_starts: HashMap<Pid, usize>,
    probes: HashMap<String, ContactProbe>,
    in_flight: HashMap<Pid, usize>,
    max_in_flight: HashMap<Pid, usize>,
    send_latency: Duration,
    list_calls: usize,
}

/// Records every facade call with the (tokio) time it was made
#[derive(Default)]
pub struct MockChatClient {
    state: Mutex<State>,
}

pub fn account(pid: Pid) -> AccountInfo {
    AccountInfo {
        pid,
        wxid: format!("wxid_self{}", pid),
        nickname: format!("Me{}", pid),
        phone: String::new(),
    }
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(pids: &[Pid]) -> Self {
        let mock = Self::new();
        mock.set_accounts(pids.iter().copied().map(account).collect());
        mock
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_accounts(&self, accounts: Vec<AccountInfo>) {
        self.state().accounts = accounts;
    }

    pub fn set_send_latency(&self, latency: Duration) {
        self.state().send_latency = latency;
    }

    pub fn fail_receiver(&self, receiver: &str) {
        self.state().failing_receivers.insert(receiver.to_string());
    }

    pub fn fail_monitor(&self, pid: Pid) {
        self.state().failing_monitors.insert(pid);
    }

    pub fn add_probe(&self, phone: &str, id: &str, nickname: &str) {
        self.state().probes.insert(
            phone.to_string(),
            ContactProbe {
                id: id.to_string(),
                nickname: nickname.to_string(),
            },
        );
    }

    pub fn calls(&self) -> Vec<SendCall> {
        self.state().calls.clone()
    }

    pub fn sent_texts(&self) -> Vec<(Pid, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c.payload {
                SentPayload::Text(text) => Some((c.pid, c.receiver, text)),
                _ => None,
            })
            .collect()
    }

    pub fn max_concurrent_sends(&self, pid: Pid) -> usize {
        self.state().max_in_flight.get(&pid).copied().unwrap_or(0)
    }

    pub fn active_monitors(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.state().monitors.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn monitor_starts(&self, pid: Pid) -> usize {
        self.state().monitor_starts.get(&pid).copied().unwrap_or(0)
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    /// Push a message through the monitor registered for `pid`
    pub async fn push_message(&self, pid: Pid, message: RawMessage) -> bool {
        let sink = self.state().monitors.get(&pid).cloned();
        match sink {
            Some(sink) => sink.deliver(message).await,
            None => false,
        }
    }

    async fn record(&self, pid: Pid, receiver: &str, payload: SentPayload) -> Result<bool> {
        let latency = {
            let mut state = self.state();
            let in_flight = state.in_flight.entry(pid).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let max = state.max_in_flight.entry(pid).or_default();
            *max = (*max).max(current);
            state.send_latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if let Some(in_flight) = state.in_flight.get_mut(&pid) {
            *in_flight -= 1;
        }
        if !state.accounts.iter().any(|a| a.pid == pid) {
            return Err(Error::Automation(format!("process {} not found", pid)));
        }
        state.calls.push(SendCall {
            pid,
            receiver: receiver.to_string(),
            payload,
            at: Instant::now(),
        });
        Ok(!state.failing_receivers.contains(receiver))
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn list_logged_in_accounts(&self) -> Result<Vec<AccountInfo>> {
        let mut state = self.state();
        state.list_calls += 1;
        Ok(state.accounts.clone())
    }

    async fn send_text(&self, pid: Pid, receiver: &str, text: &str) -> Result<bool> {
        self.record(pid, receiver, SentPayload::Text(text.to_string()))
            .await
    }

    async fn send_media(&self, pid: Pid, receiver: &str, path: &Path) -> Result<bool> {
        self.record(pid, receiver, SentPayload::Media(path.to_path_buf()))
            .await
    }

    async fn send_file(&self, pid: Pid, receiver: &str, path: &Path) -> Result<bool> {
        self.record(pid, receiver, SentPayload::File(path.to_path_buf()))
            .await
    }

    async fn fetch_contacts(&self, _pid: Pid, progress: &ProgressFn) -> Result<ContactDirectory> {
        let friend = Contact {
            wxid: "wxid_friend".to_string(),
            nickname: "Friend".to_string(),
            remarks: String::new(),
        };
        progress(1, 1);
        Ok(ContactDirectory {
            contacts: vec![friend.clone()],
            friends: vec![friend],
            groups: Vec::new(),
        })
    }

    async fn fetch_group_members(
        &self,
        _pid: Pid,
        _group_id: &str,
        progress: &ProgressFn,
    ) -> Result<Vec<GroupMember>> {
        progress(0, 0);
        Ok(Vec::new())
    }

    async fn start_message_monitor(&self, pid: Pid, sink: MonitorSink) -> Result<()> {
        let mut state = self.state();
        if state.failing_monitors.contains(&pid) {
            return Err(Error::Automation(format!("cannot attach to {}", pid)));
        }
        *state.monitor_starts.entry(pid).or_default() += 1;
        state.monitors.insert(pid, sink);
        Ok(())
    }

    async fn stop_message_monitor(&self, pid: Pid) -> Result<()> {
        self.state().monitors.remove(&pid);
        Ok(())
    }

    async fn search_contact(&self, _pid: Pid, phone: &str) -> Result<Option<ContactProbe>> {
        Ok(self.state().probes.get(phone).cloned())
    }

    async fn add_friend(&self, pid: Pid, target: &str, greeting: &str) -> Result<bool> {
        self.record(
            pid,
            target,
            SentPayload::FriendRequest {
                target: target.to_string(),
                greeting: greeting.to_string(),
            },
        )
        .await
    }
}
