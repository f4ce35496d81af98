//! The reconciliation machinery: persisted link state, identity resolution,
//! and the engine that drives a sync run through its phases.

pub mod engine;
pub mod resolver;
pub mod state;

pub use engine::{CancelToken, Phase, SyncEngine, SyncReport};
pub use state::{SyncLink, SyncState, SyncStateStore};
