//! Domain types shared by every layer: the subsystem's command and event
//! vocabulary, typed payloads, and the ports the application depends on.

pub mod command;
pub mod event;
pub mod payment;
pub mod ports;
pub mod reader;
pub mod service;
