//! Offline-resilient data access for the courier apps.
//!
//! Reads go through a two-tier page cache before reaching the remote store;
//! writes made while offline are queued durably and replayed in order later.

pub mod cache;
pub mod config;
pub mod data;
pub mod offline;
pub mod preload;
pub mod remote;
pub mod sync;

pub use config::Config;
pub use data::{DataLayer, SubmitOutcome};
