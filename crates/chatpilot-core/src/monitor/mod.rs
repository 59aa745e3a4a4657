//! Inbound message monitors

mod registry;

pub use registry::{MonitorError, MonitorHandle, MonitorRegistry};
