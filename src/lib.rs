//! Tracks the Microsoft Dynamics 365 / Power Platform release plans feed
//! and records what changed between refreshes.
//!
//! - [`feed`] fetches and parses the upstream payload, tolerating malformed JSON
//! - [`detect`] compares records against stored snapshots and emits change events
//! - [`storage`] persists snapshots, the change log and the run log in SQLite
//! - [`refresh`] ties the three together with the fallback-cache policy

pub mod config;
pub mod detect;
pub mod feed;
pub mod refresh;
pub mod storage;
pub mod util;
