//! Campaign executor - Sends one campaign to its targets in order

use super::manager::{CampaignOutcome, CampaignReport};
use crate::dispatch::{is_image, DispatchCoordinator, Payload};
use crate::resolver::AccountResolver;
use chatpilot_common::types::Pid;
use chatpilot_storage::models::{Campaign, CampaignTarget, OutgoingKind};
use tracing::{debug, info, warn};

/// Runs campaigns on worker tasks
#[derive(Clone)]
pub struct CampaignExecutor {
    dispatcher: DispatchCoordinator,
    resolver: AccountResolver,
}

impl CampaignExecutor {
    pub fn new(dispatcher: DispatchCoordinator, resolver: AccountResolver) -> Self {
        Self {
            dispatcher,
            resolver,
        }
    }

    /// Send the campaign to every target, one at a time.
    ///
    /// A target failure is counted and skipped. Only failing to resolve an
    /// account fails the whole campaign, before anything is sent.
    pub async fn run(&self, campaign: Campaign) -> CampaignReport {
        let pid = match self.resolver.resolve(campaign.pid).await {
            Ok(pid) => pid,
            Err(e) => {
                warn!(campaign = %campaign.id, error = %e, "No account for campaign");
                return CampaignReport {
                    id: campaign.id,
                    sent: 0,
                    failed: 0,
                    outcome: CampaignOutcome::Failed(e.to_string()),
                };
            }
        };

        info!(
            campaign = %campaign.id,
            pid,
            targets = campaign.targets.len(),
            "Campaign execution started"
        );

        let (mut sent, mut failed) = (0u32, 0u32);
        let last = campaign.targets.len().saturating_sub(1);
        for (idx, target) in campaign.targets.iter().enumerate() {
            if self.send_to(pid, &campaign, target).await {
                sent += 1;
            } else {
                failed += 1;
            }

            if idx < last && !campaign.delay.is_zero() {
                let pause = campaign.delay.sample_secs(&mut rand::thread_rng());
                debug!(campaign = %campaign.id, secs = pause.as_secs(), "Waiting before next target");
                tokio::time::sleep(pause).await;
            }
        }

        CampaignReport {
            id: campaign.id,
            sent,
            failed,
            outcome: CampaignOutcome::Done,
        }
    }

    /// Text first, then media if the file still exists
    async fn send_to(&self, pid: Pid, campaign: &Campaign, target: &CampaignTarget) -> bool {
        let mut ok = true;

        if !campaign.text.trim().is_empty() {
            let payload = Payload::Text(campaign.text.clone());
            if let Err(e) = self
                .dispatcher
                .send_payload(pid, &target.wxid, payload, OutgoingKind::Campaign)
                .await
            {
                warn!(campaign = %campaign.id, target = %target.wxid, error = %e, "Campaign text failed");
                ok = false;
            }
        }

        if let Some(path) = &campaign.media_path {
            let exists = tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !exists {
                warn!(campaign = %campaign.id, path = %path.display(), "Campaign media missing, skipped");
            } else {
                let payload = if is_image(path, self.dispatcher.image_extensions()) {
                    Payload::Media(path.clone())
                } else {
                    Payload::File(path.clone())
                };
                if let Err(e) = self
                    .dispatcher
                    .send_payload(pid, &target.wxid, payload, OutgoingKind::Campaign)
                    .await
                {
                    warn!(campaign = %campaign.id, target = %target.wxid, error = %e, "Campaign media failed");
                    ok = false;
                }
            }
        }

        ok
    }
}
