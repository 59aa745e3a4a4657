//! ChatPilot Storage - File-backed persistence
//!
//! This crate stores the rules/settings document, the campaign backlog,
//! the outgoing and inbound message logs and the add-friend worklist as
//! flat files under the configured data directory.

pub mod file;
pub mod models;
pub mod repository;

pub use file::{create_storage, FileStorage, LocalStorage};
pub use models::*;
pub use repository::*;
