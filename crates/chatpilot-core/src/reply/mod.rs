//! Automatic replies to inbound messages

pub mod ai;
pub mod engine;
pub mod event;
pub mod forward;

pub use ai::{AiResponder, AssistantRelay, LargeModelClient, ReplyGenerator, ResponseFormat};
pub use engine::{AiRequest, Decision, DecisionEngine, IgnoreReason};
pub use event::InboundEvent;
pub use forward::{Asker, AssistantForwarder};
