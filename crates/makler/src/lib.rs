//! Lead distribution and monetization engine.
//!
//! Clients submit housing requests through a web form; registered realtors
//! receive matching requests through a chat interface and pay a fixed price
//! to reveal the client's contact. This crate holds the parts with real
//! invariants: the record store, the matcher, the fan-out notifier, and the
//! purchase ledger, plus the HTTP router fronting them.

pub mod broker;
pub mod config;
pub mod error;
pub mod store;
pub mod telemetry;
