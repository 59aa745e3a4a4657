//! ChatPilot Core - scheduling and decision engine
//!
//! This crate reacts to inbound chat messages with rule-based or AI replies,
//! runs scheduled broadcast campaigns and bulk friend requests, and keeps the
//! per-account message monitors alive. Every client interaction goes through
//! the [`ChatClient`] facade.

pub mod bridge;
pub mod dispatch;
pub mod facade;
pub mod friends;
pub mod monitor;
pub mod reply;
pub mod resolver;
pub mod rules;
pub mod runtime;
pub mod scheduled;
pub mod settings;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::HttpChatClient;
pub use dispatch::{Directive, DispatchCoordinator, DispatchError};
pub use facade::{ChatClient, ContactProbe, InboundEnvelope, MonitorSink, RawMessage};
pub use friends::{FriendWorkflow, WorkflowSummary};
pub use monitor::{MonitorError, MonitorRegistry};
pub use reply::{Decision, DecisionEngine, InboundEvent};
pub use resolver::AccountResolver;
pub use runtime::{Engine, EngineHandle};
pub use scheduled::{CampaignError, CampaignManager, CampaignRequest, Schedule};
pub use settings::{ReplyConfig, ReplyConfigStore};
pub use status::{StatusBus, StatusEvent};
