//! ChatPilot Common - Shared types and utilities
//!
//! This crate provides the identifiers, account and contact types,
//! configuration and error handling shared across all ChatPilot components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
