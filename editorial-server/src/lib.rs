//! Manuscript workflow service.
//!
//! The permission table and domain types live in `editorial-core`; this
//! crate persists them, enforces the workflow rules, sends notifications,
//! runs the periodic sweeps and serves the HTTP surface.

pub mod config;
pub mod http;
pub mod notify;
pub mod scheduler;
pub mod signed_link;
pub mod storage;
pub mod sweep;
pub mod workflow;
