//! Pairing and session engine: the operations chat handlers call, plus the
//! background tasks that keep the search pool and session registry healthy.

pub mod config;
pub mod error;
pub mod matcher;
pub mod notify;
pub mod reaper;
pub mod rescan;

pub use config::EngineConfig;
pub use error::EngineError;
pub use matcher::{Matchmaker, Relay};
pub use notify::Notifier;
pub use reaper::run_reaper_loop;
pub use rescan::{rescan_once, run_rescan_loop};
