//! Campaign scheduling - the campaign table and its executor

mod executor;
mod manager;

pub use executor::CampaignExecutor;
pub use manager::{
    normalise_due, CampaignEdit, CampaignError, CampaignManager, CampaignOutcome, CampaignReport,
    CampaignRequest, Enqueued, Schedule,
};
