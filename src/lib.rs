//! Channel Keeper Library
//!
//! A Telegram bot that keeps a channel's audience:
//! - Auto-approves join requests and sends a welcome message
//! - Sends a farewell message when a member leaves
//! - Tracks departed members and sends re-engagement notices on a fixed cadence
//! - Persists known and departed members as JSON files
//! - Exposes health and Prometheus metrics endpoints

pub mod cadence;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod keepalive;
pub mod metrics;
pub mod reconciler;
pub mod store;
pub mod templates;

// Re-export common types
pub use cadence::{CadencePolicy, DepartureRecord, RetentionState};
pub use config::Config;
pub use context::BotContext;
pub use error::{Error, Result};
pub use gateway::{Gateway, MemberStatus, TeloxideGateway};
pub use reconciler::{PassSummary, Reconciler};
pub use store::{MemberStore, StoreLock};
