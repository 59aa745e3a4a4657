//! Engine runtime
//!
//! One task owns the campaign table, the monitor registry and the reply
//! configuration. It reacts to the scheduler tick, the monitor health check,
//! inbound messages, worker completions and commands from [`EngineHandle`].
//! Workers never touch the campaign table; they report back over a channel.

use crate::dispatch::DispatchCoordinator;
use crate::facade::{ChatClient, InboundEnvelope, SerializedClient};
use crate::friends::{FriendWorkflow, WorkflowSummary};
use crate::monitor::MonitorRegistry;
use crate::reply::{
    AiResponder, AssistantForwarder, AssistantRelay, Decision, DecisionEngine, InboundEvent,
    LargeModelClient, ResponseFormat,
};
use crate::resolver::AccountResolver;
use crate::scheduled::{
    CampaignEdit, CampaignExecutor, CampaignManager, CampaignOutcome, CampaignReport,
    CampaignRequest, Enqueued,
};
use crate::settings::{ReplyConfig, ReplyConfigStore, RuleChange, SettingsChange};
use crate::status::{StatusBus, StatusEvent};
use chatpilot_common::config::Config;
use chatpilot_common::types::{CampaignId, ContactDirectory, DelayRange, GroupMember, Pid};
use chatpilot_common::{Error, Result};
use chatpilot_storage::models::{Campaign, InboundRecord, OutgoingKind};
use chatpilot_storage::{
    CampaignRepository, FileStorage, FriendRequestRepository, InboundLog, OutgoingLog,
    RulesRepository,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Inbound history entries older than this are pruned at start
const INBOUND_RETENTION_DAYS: i64 = 30;

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    EnqueueCampaign(CampaignRequest, Reply<Result<Enqueued>>),
    EditCampaign(CampaignId, CampaignEdit, Reply<Result<Campaign>>),
    DeleteCampaign(CampaignId, Reply<Result<Campaign>>),
    DeleteCampaigns(Vec<CampaignId>, Reply<Vec<CampaignId>>),
    ListCampaigns(Reply<Vec<Campaign>>),
    UpdateSettings(SettingsChange, Reply<Arc<ReplyConfig>>),
    UpdateRules(RuleChange, Reply<Arc<ReplyConfig>>),
    StartMonitors(Reply<Result<usize>>),
    StopMonitors(Reply<()>),
    Shutdown,
}

/// The event loop and everything it owns
pub struct Engine {
    config: Config,
    dispatcher: DispatchCoordinator,
    replies: ReplyConfigStore,
    decisions: DecisionEngine,
    forwarder: Arc<AssistantForwarder>,
    responder: Arc<AiResponder>,
    campaigns: CampaignManager,
    executor: CampaignExecutor,
    monitors: MonitorRegistry,
    friends: FriendWorkflow,
    inbound_log: InboundLog,
    status: StatusBus,
    inbound_rx: mpsc::Receiver<InboundEnvelope>,
    command_rx: mpsc::Receiver<Command>,
    done_tx: mpsc::UnboundedSender<CampaignReport>,
    done_rx: mpsc::UnboundedReceiver<CampaignReport>,
}

impl Engine {
    /// Wire every component and load persisted state
    pub async fn build(
        config: Config,
        client: Arc<dyn ChatClient>,
        storage: Arc<dyn FileStorage>,
    ) -> Result<(Engine, EngineHandle)> {
        let client: Arc<dyn ChatClient> = Arc::new(SerializedClient::new(client));
        let status = StatusBus::new(config.monitor.event_buffer);
        let resolver = AccountResolver::new(client.clone());

        let dispatcher = DispatchCoordinator::new(
            client.clone(),
            resolver.clone(),
            OutgoingLog::new(storage.clone()),
            status.clone(),
            config.dispatch.image_extensions.clone(),
        );
        let replies = ReplyConfigStore::load(RulesRepository::new(storage.clone())).await?;

        let forwarder = Arc::new(AssistantForwarder::new(config.ai.assistant_id.clone()));
        let responder = Arc::new(AiResponder::new(
            Arc::new(LargeModelClient::new(&config.ai)?),
            Arc::new(AssistantRelay::new(client.clone(), forwarder.clone())),
            ResponseFormat::from_config(&config.ai),
        ));

        let margin = chrono::Duration::seconds(
            i64::try_from(config.scheduler.safety_margin_secs).unwrap_or(i64::MAX / 1000),
        );
        let campaigns = CampaignManager::load(CampaignRepository::new(storage.clone()), margin).await;
        let executor = CampaignExecutor::new(dispatcher.clone(), resolver.clone());

        let (inbound_tx, inbound_rx) = mpsc::channel(config.monitor.event_buffer.max(1));
        let monitors = MonitorRegistry::new(client.clone(), inbound_tx);

        let friends = FriendWorkflow::load(
            client.clone(),
            FriendRequestRepository::new(storage.clone()),
            status.clone(),
            config.friends.default_greeting.clone(),
        )
        .await;

        let inbound_log = InboundLog::new(storage);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let handle = EngineHandle {
            commands: command_tx,
            client: client.clone(),
            resolver: resolver.clone(),
            status: status.clone(),
            replies: replies.subscribe(),
            friends: friends.clone(),
            inbound_log: inbound_log.clone(),
            friend_delay: DelayRange::new(
                config.friends.min_delay_minutes,
                config.friends.max_delay_minutes,
            ),
        };

        let engine = Engine {
            decisions: DecisionEngine::new(config.ai.assistant_id.clone()),
            config,
            dispatcher,
            replies,
            forwarder,
            responder,
            campaigns,
            executor,
            monitors,
            friends,
            inbound_log,
            status,
            inbound_rx,
            command_rx,
            done_tx,
            done_rx,
        };
        Ok((engine, handle))
    }

    /// Replace the AI responder
    pub fn with_responder(mut self, responder: AiResponder) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) {
        info!("Engine started");

        match self.inbound_log.prune_older_than(INBOUND_RETENTION_DAYS).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Pruned inbound history"),
            Err(e) => warn!(error = %e, "Failed to prune inbound history"),
        }
        if let Err(e) = self.monitors.start_all().await {
            warn!(error = %e, "Initial monitor start failed");
        }

        let tick_period = Duration::from_millis(self.config.scheduler.tick_interval_ms.max(1));
        let mut tick = interval(tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let health_period = Duration::from_secs(self.config.monitor.health_check_secs.max(1));
        let mut health = interval_at(Instant::now() + health_period, health_period);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick().await,
                _ = health.tick() => {
                    self.monitors.health_check().await;
                }
                Some(envelope) = self.inbound_rx.recv() => self.on_inbound(envelope).await,
                Some(report) = self.done_rx.recv() => self.on_campaign_done(report).await,
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("Engine shutting down");
        self.friends.stop();
        self.dispatcher.shutdown();
        self.monitors.stop_all().await;
        info!("Engine stopped");
    }

    async fn on_tick(&mut self) {
        for campaign in self.campaigns.take_due(Utc::now()).await {
            self.spawn_campaign(campaign);
        }
    }

    fn spawn_campaign(&self, campaign: Campaign) {
        let executor = self.executor.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let report = executor.run(campaign).await;
            if done.send(report).is_err() {
                debug!("Engine gone before campaign finished");
            }
        });
    }

    async fn on_campaign_done(&mut self, report: CampaignReport) {
        let message = match &report.outcome {
            CampaignOutcome::Done => StatusEvent::Info(format!(
                "Campaign finished: {} sent, {} failed",
                report.sent, report.failed
            )),
            CampaignOutcome::Failed(reason) => {
                StatusEvent::Warning(format!("Campaign failed: {}", reason))
            }
        };
        self.campaigns.finish(report).await;
        self.status.publish(message);
    }

    async fn on_inbound(&mut self, envelope: InboundEnvelope) {
        let event = InboundEvent::from_envelope(envelope);
        debug!(sender = %event.sender, pid = event.account.pid, "Inbound message");

        if let Err(e) = self.inbound_log.append(event.to_record()).await {
            warn!(error = %e, "Failed to record inbound message");
        }
        self.friends.observe(&event);

        if self.forwarder.is_assistant(&event.sender) {
            if let Some(directive) = self.forwarder.forward(&event) {
                self.dispatcher.schedule(directive);
            }
            return;
        }

        let config = self.replies.snapshot();
        let decision = self
            .decisions
            .decide(&event, &config, &mut rand::thread_rng());
        match decision {
            Decision::Reply(directives) => {
                for directive in directives {
                    self.dispatcher.schedule(directive);
                }
            }
            Decision::Generate(request) => {
                let responder = self.responder.clone();
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    match responder.respond(&request).await {
                        Ok(Some(directive)) => {
                            dispatcher.schedule(directive);
                        }
                        Ok(None) => {}
                        Err(e) => warn!(receiver = %request.receiver, error = %e, "AI reply failed"),
                    }
                });
            }
            Decision::Ignore(reason) => debug!(sender = %event.sender, %reason, "No reply"),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::EnqueueCampaign(request, reply) => {
                let result = self.campaigns.enqueue(request, Utc::now()).await;
                if let Ok(Enqueued::Immediate(campaign)) = &result {
                    self.spawn_campaign(campaign.clone());
                }
                let _ = reply.send(result.map_err(Error::from));
            }
            Command::EditCampaign(id, edit, reply) => {
                let result = self.campaigns.edit(id, edit, Utc::now()).await;
                let _ = reply.send(result.map_err(Error::from));
            }
            Command::DeleteCampaign(id, reply) => {
                let result = self.campaigns.delete(id).await;
                let _ = reply.send(result.map_err(Error::from));
            }
            Command::DeleteCampaigns(ids, reply) => {
                let _ = reply.send(self.campaigns.delete_many(&ids).await);
            }
            Command::ListCampaigns(reply) => {
                let _ = reply.send(self.campaigns.list().to_vec());
            }
            Command::UpdateSettings(change, reply) => {
                let config = self.replies.apply_settings(change).await;
                self.dispatcher.cancel_kind(OutgoingKind::AutoReply);
                let _ = reply.send(config);
            }
            Command::UpdateRules(change, reply) => {
                let supersedes = matches!(change, RuleChange::Replace(_) | RuleChange::Clear);
                let config = self.replies.apply_rules(change).await;
                if supersedes {
                    self.dispatcher.cancel_kind(OutgoingKind::AutoReply);
                }
                let _ = reply.send(config);
            }
            Command::StartMonitors(reply) => {
                let result = self.monitors.start_all().await.map_err(Error::from);
                let _ = reply.send(result);
            }
            Command::StopMonitors(reply) => {
                self.monitors.stop_all().await;
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }
}

/// Cloneable front door to a running [`Engine`]
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    client: Arc<dyn ChatClient>,
    resolver: AccountResolver,
    status: StatusBus,
    replies: watch::Receiver<Arc<ReplyConfig>>,
    friends: FriendWorkflow,
    inbound_log: InboundLog,
    friend_delay: DelayRange,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| Error::Internal("engine is not running".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("engine dropped the request".to_string()))
    }

    pub async fn enqueue_campaign(&self, request: CampaignRequest) -> Result<Enqueued> {
        self.request(|tx| Command::EnqueueCampaign(request, tx))
            .await?
    }

    pub async fn edit_campaign(&self, id: CampaignId, edit: CampaignEdit) -> Result<Campaign> {
        self.request(|tx| Command::EditCampaign(id, edit, tx))
            .await?
    }

    pub async fn delete_campaign(&self, id: CampaignId) -> Result<Campaign> {
        self.request(|tx| Command::DeleteCampaign(id, tx)).await?
    }

    pub async fn delete_campaigns(&self, ids: Vec<CampaignId>) -> Result<Vec<CampaignId>> {
        self.request(|tx| Command::DeleteCampaigns(ids, tx)).await
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        self.request(Command::ListCampaigns).await
    }

    /// Set the account used when an operation names none
    pub fn select_account(&self, pid: Option<Pid>) {
        self.resolver.select(pid);
    }

    pub fn selected_account(&self) -> Option<Pid> {
        self.resolver.selected()
    }

    pub async fn update_settings(&self, change: SettingsChange) -> Result<Arc<ReplyConfig>> {
        self.request(|tx| Command::UpdateSettings(change, tx)).await
    }

    pub async fn update_rules(&self, change: RuleChange) -> Result<Arc<ReplyConfig>> {
        self.request(|tx| Command::UpdateRules(change, tx)).await
    }

    pub async fn start_monitors(&self) -> Result<usize> {
        self.request(Command::StartMonitors).await?
    }

    pub async fn stop_monitors(&self) -> Result<()> {
        self.request(Command::StopMonitors).await
    }

    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Engine already stopped");
        }
    }

    /// Current reply configuration snapshot
    pub fn reply_config(&self) -> Arc<ReplyConfig> {
        self.replies.borrow().clone()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn friends(&self) -> &FriendWorkflow {
        &self.friends
    }

    /// Start friend requests on the given accounts, or on every logged-in account
    pub async fn start_friend_requests(
        &self,
        accounts: Option<Vec<Pid>>,
    ) -> Result<JoinHandle<WorkflowSummary>> {
        let accounts = match accounts {
            Some(accounts) => accounts,
            None => self
                .client
                .list_logged_in_accounts()
                .await?
                .into_iter()
                .map(|a| a.pid)
                .collect(),
        };
        self.friends.start(accounts, self.friend_delay)
    }

    pub async fn recent_messages(&self, limit: usize) -> Vec<InboundRecord> {
        self.inbound_log.load_recent(limit).await
    }

    /// Enumerate contacts of the resolved account
    pub async fn fetch_contacts(&self, pid: Option<Pid>) -> Result<ContactDirectory> {
        let pid = self.resolver.resolve(pid).await?;
        let directory = self
            .client
            .fetch_contacts(pid, &|current: usize, total: usize| {
                debug!(current, total, "Fetching contacts");
            })
            .await?;
        info!(
            pid,
            friends = directory.friends.len(),
            groups = directory.groups.len(),
            "Contacts fetched"
        );
        Ok(directory)
    }

    pub async fn fetch_group_members(
        &self,
        pid: Option<Pid>,
        group_id: &str,
    ) -> Result<Vec<GroupMember>> {
        let pid = self.resolver.resolve(pid).await?;
        self.client
            .fetch_group_members(pid, group_id, &|current: usize, total: usize| {
                debug!(current, total, "Fetching group members");
            })
            .await
            .map_err(|e| {
                error!(pid, group_id, error = %e, "Failed to fetch group members");
                e
            })
    }
}
