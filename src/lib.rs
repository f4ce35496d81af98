//! taskbridge - bidirectional sync between TaskWarrior and Apple Reminders.
//!
//! Both task stores are driven through their command-line surfaces: the
//! `task` binary on one side and `osascript` on the other. Neither store
//! knows about the other, so this crate keeps a persisted link table mapping
//! records across them and reconciles the two sides on every run.
//!
//! The moving parts:
//! - [`record`] is the canonical task model both adapters normalize into.
//! - [`taskwarrior`] and [`reminders`] implement [`traits::StoreAdapter`]
//!   over the external tools.
//! - [`sync`] holds the link table, the identity resolver for records that
//!   predate any link, and the engine that drives a reconciliation run.
//! - [`cli`] is the user-facing command surface.

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod paths;
pub mod record;
pub mod reminders;
pub mod sync;
pub mod taskwarrior;
pub mod testing;
pub mod traits;

pub use error::{Error, Result};

/// Crate version, from Cargo metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
