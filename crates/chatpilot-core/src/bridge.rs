//! HTTP bridge to the automation sidecar
//!
//! The sidecar wraps the desktop automation library and exposes it as JSON
//! over HTTP on the local machine. Inbound messages are polled per account
//! process with a cursor, one task per monitored pid.

use crate::facade::{ChatClient, ContactProbe, MonitorSink, ProgressFn, RawMessage};
use async_trait::async_trait;
use chatpilot_common::config::AutomationConfig;
use chatpilot_common::types::{AccountInfo, ContactDirectory, GroupMember, Pid};
use chatpilot_common::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    receiver: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct MediaRequest<'a> {
    receiver: &'a str,
    path: &'a Path,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    phone: &'a str,
}

#[derive(Debug, Serialize)]
struct FriendRequest<'a> {
    target: &'a str,
    greeting: &'a str,
}

#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(default)]
    ok: bool,
}

#[derive(Debug, Deserialize)]
struct MessageBatch {
    #[serde(default)]
    messages: Vec<RawMessage>,
    cursor: u64,
}

/// [`ChatClient`] backed by the automation sidecar
pub struct HttpChatClient {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    monitors: Mutex<HashMap<Pid, CancellationToken>>,
}

impl HttpChatClient {
    pub fn new(config: &AutomationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            monitors: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::Automation(format!("GET {} failed: {}", path, e)))?;
        decode(path, response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Automation(format!("POST {} failed: {}", path, e)))?;
        decode(path, response).await
    }

    fn monitors(&self) -> std::sync::MutexGuard<'_, HashMap<Pid, CancellationToken>> {
        self.monitors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of polling tasks currently registered
    pub fn monitor_count(&self) -> usize {
        self.monitors().len()
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Automation(format!(
            "{} returned status {}: {}",
            path, status, body
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Error::Automation(format!("invalid response from {}: {}", path, e)))
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn list_logged_in_accounts(&self) -> Result<Vec<AccountInfo>> {
        self.get_json("/accounts").await
    }

    async fn send_text(&self, pid: Pid, receiver: &str, text: &str) -> Result<bool> {
        let ack: Ack = self
            .post_json(
                &format!("/accounts/{}/text", pid),
                &TextRequest { receiver, text },
            )
            .await?;
        Ok(ack.ok)
    }

    async fn send_media(&self, pid: Pid, receiver: &str, path: &Path) -> Result<bool> {
        let ack: Ack = self
            .post_json(
                &format!("/accounts/{}/media", pid),
                &MediaRequest { receiver, path },
            )
            .await?;
        Ok(ack.ok)
    }

    async fn fetch_contacts(&self, pid: Pid, progress: &ProgressFn) -> Result<ContactDirectory> {
        let directory: ContactDirectory =
            self.get_json(&format!("/accounts/{}/contacts", pid)).await?;
        let total = directory.contacts.len() + directory.friends.len() + directory.groups.len();
        progress(total, total);
        Ok(directory)
    }

    async fn fetch_group_members(
        &self,
        pid: Pid,
        group_id: &str,
        progress: &ProgressFn,
    ) -> Result<Vec<GroupMember>> {
        let members: Vec<GroupMember> = self
            .get_json(&format!("/accounts/{}/groups/{}/members", pid, group_id))
            .await?;
        progress(members.len(), members.len());
        Ok(members)
    }

    async fn start_message_monitor(&self, pid: Pid, sink: MonitorSink) -> Result<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.monitors().insert(pid, token.clone()) {
            previous.cancel();
        }

        let poller = Poller {
            client: self.client.clone(),
            url: self.url(&format!("/accounts/{}/messages", pid)),
            interval: self.poll_interval,
            sink,
            token,
        };
        tokio::spawn(poller.run());
        info!(pid, "Polling monitor started");
        Ok(())
    }

    async fn stop_message_monitor(&self, pid: Pid) -> Result<()> {
        if let Some(token) = self.monitors().remove(&pid) {
            token.cancel();
            debug!(pid, "Polling monitor cancelled");
        }
        Ok(())
    }

    async fn search_contact(&self, pid: Pid, phone: &str) -> Result<Option<ContactProbe>> {
        let path = format!("/accounts/{}/friends/search", pid);
        let response = self
            .client
            .post(self.url(&path))
            .json(&SearchRequest { phone })
            .send()
            .await
            .map_err(|e| Error::Automation(format!("POST {} failed: {}", path, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(&path, response).await
    }

    async fn add_friend(&self, pid: Pid, target: &str, greeting: &str) -> Result<bool> {
        let ack: Ack = self
            .post_json(
                &format!("/accounts/{}/friends", pid),
                &FriendRequest { target, greeting },
            )
            .await?;
        Ok(ack.ok)
    }
}

/// One polling loop for one account process
struct Poller {
    client: Client,
    url: String,
    interval: Duration,
    sink: MonitorSink,
    token: CancellationToken,
}

impl Poller {
    async fn run(self) {
        let pid = self.sink.pid();
        let mut cursor = 0u64;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let batch = match self.poll(cursor).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(pid, error = %e, "Message poll failed");
                    continue;
                }
            };

            trace!(pid, cursor, count = batch.messages.len(), "Polled messages");
            cursor = batch.cursor;
            for message in batch.messages {
                if self.token.is_cancelled() {
                    break;
                }
                if !self.sink.deliver(message).await {
                    debug!(pid, "Inbound channel closed, stopping monitor");
                    return;
                }
            }
        }

        debug!(pid, "Polling monitor exited");
    }

    async fn poll(&self, cursor: u64) -> Result<MessageBatch> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("after", cursor)])
            .send()
            .await
            .map_err(|e| Error::Automation(format!("message poll failed: {}", e)))?;
        decode("messages", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatpilot_common::types::AccountIdentity;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpChatClient {
        HttpChatClient::new(&AutomationConfig {
            endpoint: format!("{}/", server.uri()),
            timeout_secs: 5,
            poll_interval_ms: 10,
        })
        .unwrap()
    }

    fn identity(pid: Pid) -> AccountIdentity {
        AccountIdentity {
            pid,
            wxid: format!("wxid_self{}", pid),
            nickname: format!("Me{}", pid),
        }
    }

    #[tokio::test]
    async fn test_list_accounts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"pid": 7, "wxid": "wxid_me", "nickname": "Me"}
            ])))
            .mount(&server)
            .await;

        let accounts = client(&server).list_logged_in_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].pid, 7);
        assert_eq!(accounts[0].phone, "");
    }

    #[tokio::test]
    async fn test_send_text_reports_refusal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/7/text"))
            .and(body_json(json!({"receiver": "wxid_a", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/7/text"))
            .and(body_json(json!({"receiver": "wxid_b", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": false})))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.send_text(7, "wxid_a", "hello").await.unwrap());
        assert!(!client.send_text(7, "wxid_b", "hello").await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_automation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/7/media"))
            .respond_with(ResponseTemplate::new(500).set_body_string("window not found"))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_media(7, "wxid_a", Path::new("/tmp/a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Automation(ref m) if m.contains("window not found")));
    }

    #[tokio::test]
    async fn test_contacts_report_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/7/contacts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "friends": [{"wxid": "wxid_a", "nickname": "A"}],
                "groups": [{"wxid": "1@chatroom", "nickname": "G"}]
            })))
            .mount(&server)
            .await;

        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let directory = client(&server)
            .fetch_contacts(7, &move |current: usize, total: usize| {
                sink.lock().unwrap().push((current, total));
            })
            .await
            .unwrap();

        assert!(directory.contacts.is_empty());
        assert_eq!(directory.find("1@chatroom").unwrap().nickname, "G");
        assert_eq!(*seen.lock().unwrap(), vec![(2, 2)]);
    }

    #[tokio::test]
    async fn test_search_contact_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/7/friends/search"))
            .and(body_json(json!({"phone": "13800000000"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "v3_ticket"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/7/friends/search"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server);
        let probe = client.search_contact(7, "13800000000").await.unwrap().unwrap();
        assert_eq!(probe.id, "v3_ticket");
        assert!(client.search_contact(7, "13900000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_monitor_delivers_and_advances_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/3/messages"))
            .and(query_param("after", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"wxid": "wxid_a", "content": "one"},
                    {"sender": "1@chatroom", "content": "two", "member_id": "wxid_b"}
                ],
                "cursor": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/3/messages"))
            .and(query_param("after", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"messages": [], "cursor": 2})),
            )
            .mount(&server)
            .await;

        let client = client(&server);
        let (tx, mut rx) = mpsc::channel(8);
        client
            .start_message_monitor(3, MonitorSink::new(identity(3), tx))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.account.pid, 3);
        assert_eq!(first.message.content, "one");
        assert_eq!(second.message.member_id.as_deref(), Some("wxid_b"));

        // Later polls resume from the returned cursor
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        client.stop_message_monitor(3).await.unwrap();
        assert_eq!(client.monitor_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/3/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"messages": [], "cursor": 0})),
            )
            .mount(&server)
            .await;

        let client = client(&server);
        let (tx, _rx) = mpsc::channel(8);
        client
            .start_message_monitor(3, MonitorSink::new(identity(3), tx))
            .await
            .unwrap();
        assert_eq!(client.monitor_count(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        client.stop_message_monitor(3).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let polls = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), polls);

        // Stopping an unknown pid is harmless
        client.stop_message_monitor(9).await.unwrap();
    }
}
