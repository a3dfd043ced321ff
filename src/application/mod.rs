//! Application layer: correlates commands with their completion events,
//! answers token challenges and supervises the connection service.
//!
//! [`terminal::Terminal`] is the entry point; the other modules are the
//! pieces it is assembled from.

pub mod connection_manager;
pub mod event_channel;
pub mod request_bridge;
pub mod service_lifecycle;
pub mod terminal;
pub mod token_negotiator;
