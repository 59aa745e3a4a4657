//! Campaign Manager - Owns the campaign table and its state machine
//!
//! The manager is owned by the runtime loop. Every mutation is persisted
//! right away; a failed write is logged and the in-memory table stays
//! authoritative for the running session.

use chatpilot_common::types::{CampaignId, DelayRange, Pid};
use chatpilot_common::Error;
use chatpilot_storage::models::{Campaign, CampaignStatus, CampaignTarget};
use chatpilot_storage::CampaignRepository;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Campaign manager errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Campaign has no targets")]
    NoTargets,

    #[error("Campaign has neither text nor media")]
    EmptyBody,

    #[error("Campaign is {0} and can no longer be edited")]
    NotEditable(CampaignStatus),

    #[error("Campaign is {0} and cannot be deleted")]
    NotDeletable(CampaignStatus),
}

impl From<CampaignError> for Error {
    fn from(e: CampaignError) -> Self {
        match e {
            CampaignError::NotFound => Error::NotFound("campaign".to_string()),
            CampaignError::NoTargets | CampaignError::EmptyBody => Error::Validation(e.to_string()),
            CampaignError::NotEditable(_) | CampaignError::NotDeletable(_) => {
                Error::InvalidState(e.to_string())
            }
        }
    }
}

/// When a new campaign should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Skip the table and send right away
    Now,
    At(DateTime<Utc>),
}

/// A campaign as submitted by the user
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignRequest {
    pub name: String,
    pub schedule: Schedule,
    pub targets: Vec<CampaignTarget>,
    pub text: String,
    pub media_path: Option<PathBuf>,
    pub delay: DelayRange,
    pub pid: Option<Pid>,
}

/// Changes allowed while a campaign is waiting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignEdit {
    pub due_at: Option<DateTime<Utc>>,
    /// Raw `(min, max)`; max is clamped to at least min
    pub delay: Option<(u64, u64)>,
    pub text: Option<String>,
    /// `Some(None)` clears the media path
    pub media_path: Option<Option<PathBuf>>,
}

/// Outcome of `enqueue`
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// Stored as waiting
    Queued(Campaign),
    /// Not stored; already running and must be executed now
    Immediate(Campaign),
}

/// How a campaign worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignOutcome {
    Done,
    Failed(String),
}

/// Sent back by a campaign worker when it finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub id: CampaignId,
    pub sent: u32,
    pub failed: u32,
    pub outcome: CampaignOutcome,
}

/// Due-times in the past are pushed to `now + margin`
pub fn normalise_due(due_at: DateTime<Utc>, now: DateTime<Utc>, margin: Duration) -> DateTime<Utc> {
    if due_at < now {
        now + margin
    } else {
        due_at
    }
}

/// Campaign Manager - Manages the campaign table
pub struct CampaignManager {
    campaigns: Vec<Campaign>,
    repo: CampaignRepository,
    safety_margin: Duration,
}

impl CampaignManager {
    /// Load the persisted backlog.
    ///
    /// Campaigns left running by a previous session are marked failed.
    pub async fn load(repo: CampaignRepository, safety_margin: Duration) -> Self {
        let mut campaigns = match repo.load().await {
            Ok(campaigns) => campaigns,
            Err(e) => {
                error!(error = %e, "Failed to load campaign backlog");
                Vec::new()
            }
        };

        let mut interrupted = 0;
        for campaign in campaigns
            .iter_mut()
            .filter(|c| c.status == CampaignStatus::Running)
        {
            campaign.status = CampaignStatus::Failed;
            campaign.finished_at = Some(Utc::now());
            interrupted += 1;
        }

        let manager = Self {
            campaigns,
            repo,
            safety_margin,
        };
        if interrupted > 0 {
            warn!(count = interrupted, "Campaigns interrupted by restart marked failed");
            manager.persist().await;
        }
        info!(count = manager.campaigns.len(), "Campaign backlog loaded");
        manager
    }

    pub fn list(&self) -> &[Campaign] {
        &self.campaigns
    }

    pub fn get(&self, id: CampaignId) -> Option<&Campaign> {
        self.campaigns.iter().find(|c| c.id == id)
    }

    fn position(&self, id: CampaignId) -> Result<usize, CampaignError> {
        self.campaigns
            .iter()
            .position(|c| c.id == id)
            .ok_or(CampaignError::NotFound)
    }

    async fn persist(&self) {
        if let Err(e) = self.repo.save(&self.campaigns).await {
            error!(error = %e, "Failed to persist campaign backlog");
        }
    }

    /// Validate and store a new campaign, or hand it back for immediate execution
    pub async fn enqueue(
        &mut self,
        request: CampaignRequest,
        now: DateTime<Utc>,
    ) -> Result<Enqueued, CampaignError> {
        if request.targets.is_empty() {
            return Err(CampaignError::NoTargets);
        }

        let mut campaign = Campaign {
            id: Uuid::now_v7(),
            name: request.name,
            due_at: now,
            targets: request.targets,
            text: request.text,
            media_path: request.media_path.filter(|p| !p.as_os_str().is_empty()),
            delay: DelayRange::new(request.delay.min, request.delay.max),
            pid: request.pid,
            status: CampaignStatus::Waiting,
            created_at: now,
            started_at: None,
            finished_at: None,
            sent_count: 0,
            failed_count: 0,
        };
        if !campaign.has_body() {
            return Err(CampaignError::EmptyBody);
        }

        match request.schedule {
            Schedule::Now => {
                campaign.status = CampaignStatus::Running;
                campaign.started_at = Some(now);
                info!(campaign = %campaign.id, targets = campaign.targets.len(), "Campaign sending now");
                Ok(Enqueued::Immediate(campaign))
            }
            Schedule::At(due_at) => {
                campaign.due_at = normalise_due(due_at, now, self.safety_margin);
                if campaign.due_at != due_at {
                    debug!(campaign = %campaign.id, requested = %due_at, due = %campaign.due_at, "Due time was in the past");
                }
                info!(
                    campaign = %campaign.id,
                    name = %campaign.name,
                    due = %campaign.due_at,
                    "Campaign queued"
                );
                self.campaigns.push(campaign.clone());
                self.persist().await;
                Ok(Enqueued::Queued(campaign))
            }
        }
    }

    /// Edit a waiting campaign; the status is left untouched
    pub async fn edit(
        &mut self,
        id: CampaignId,
        edit: CampaignEdit,
        now: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        let idx = self.position(id)?;
        let margin = self.safety_margin;
        let campaign = &mut self.campaigns[idx];
        if !campaign.status.is_editable() {
            return Err(CampaignError::NotEditable(campaign.status));
        }

        let mut next = campaign.clone();
        if let Some(due_at) = edit.due_at {
            next.due_at = normalise_due(due_at, now, margin);
        }
        if let Some((min, max)) = edit.delay {
            next.delay = DelayRange::new(min, max);
        }
        if let Some(text) = edit.text {
            next.text = text;
        }
        if let Some(media_path) = edit.media_path {
            next.media_path = media_path.filter(|p| !p.as_os_str().is_empty());
        }
        if !next.has_body() {
            return Err(CampaignError::EmptyBody);
        }

        *campaign = next.clone();
        info!(campaign = %id, due = %next.due_at, "Campaign edited");
        self.persist().await;
        Ok(next)
    }

    /// Remove a waiting or finished campaign
    pub async fn delete(&mut self, id: CampaignId) -> Result<Campaign, CampaignError> {
        let idx = self.position(id)?;
        let status = self.campaigns[idx].status;
        if !status.is_deletable() {
            return Err(CampaignError::NotDeletable(status));
        }
        let removed = self.campaigns.remove(idx);
        info!(campaign = %id, "Campaign deleted");
        self.persist().await;
        Ok(removed)
    }

    /// Remove every distinct id in a selection; ids that cannot be deleted are skipped
    pub async fn delete_many(&mut self, ids: &[CampaignId]) -> Vec<CampaignId> {
        let mut seen = HashSet::new();
        let mut deleted = Vec::new();
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            match self.position(id) {
                Ok(idx) if self.campaigns[idx].status.is_deletable() => {
                    self.campaigns.remove(idx);
                    deleted.push(id);
                }
                Ok(idx) => {
                    warn!(campaign = %id, status = %self.campaigns[idx].status, "Skipping campaign that cannot be deleted");
                }
                Err(_) => debug!(campaign = %id, "Selected campaign already gone"),
            }
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), "Campaigns deleted");
            self.persist().await;
        }
        deleted
    }

    /// Move every due waiting campaign to running and return them for execution.
    ///
    /// A running campaign is never returned again.
    pub async fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Campaign> {
        let mut due = Vec::new();
        for campaign in self.campaigns.iter_mut() {
            if campaign.status == CampaignStatus::Waiting && campaign.due_at <= now {
                campaign.status = CampaignStatus::Running;
                campaign.started_at = Some(now);
                info!(campaign = %campaign.id, name = %campaign.name, "Campaign due, starting");
                due.push(campaign.clone());
            }
        }
        if !due.is_empty() {
            self.persist().await;
        }
        due
    }

    /// Record a worker's result; unknown ids (immediate campaigns) are ignored
    pub async fn finish(&mut self, report: CampaignReport) -> Option<Campaign> {
        let Ok(idx) = self.position(report.id) else {
            debug!(campaign = %report.id, "Finished campaign is not tracked");
            return None;
        };

        let campaign = &mut self.campaigns[idx];
        let next = match &report.outcome {
            CampaignOutcome::Done => CampaignStatus::Done,
            CampaignOutcome::Failed(_) => CampaignStatus::Failed,
        };
        if !campaign.status.can_transition_to(next) {
            warn!(campaign = %report.id, from = %campaign.status, to = %next, "Ignoring illegal campaign transition");
            return None;
        }

        campaign.status = next;
        campaign.sent_count = report.sent;
        campaign.failed_count = report.failed;
        campaign.finished_at = Some(Utc::now());
        let finished = campaign.clone();
        match &report.outcome {
            CampaignOutcome::Done => info!(
                campaign = %report.id,
                sent = report.sent,
                failed = report.failed,
                "Campaign done"
            ),
            CampaignOutcome::Failed(reason) => {
                warn!(campaign = %report.id, reason = %reason, "Campaign failed")
            }
        }
        self.persist().await;
        Some(finished)
    }
}
