//! Engagement, rewards and access gating for course content.
//!
//! - [`access`] decides how much of an item a member may read.
//! - [`progress`] records reading progress and awards completion once.
//! - [`ledger`] accumulates per-topic credit without lost updates.
//! - [`codes`] runs the reward-code application lifecycle.
//! - [`secrets`] keeps expiring one-time secrets in storage.

pub mod access;
pub mod codes;
pub mod config;
pub mod db;
pub mod engagement;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod progress;
pub mod report;
pub mod secrets;
pub mod store;

pub use config::{Config, Settings};
pub use engagement::{Engagement, FinishedReading};
pub use error::{EngagementError, Result};
pub use store::{Directory, MemoryStore, PgStore, Store};
