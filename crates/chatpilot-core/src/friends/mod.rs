//! Add-friend worklist processing

mod workflow;

pub use workflow::{FriendWorkflow, WorkflowSummary, RATE_LIMIT_PHRASE};
