//! Transports that connect the bridge to a subsystem outside the process.

pub mod jsonl;
