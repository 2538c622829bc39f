//! # spv-client
//! Persistence and sync orchestration for SPV clients.
//!
//! Builds on `spv-core` with a RocksDB header backend, layered
//! configuration, tracing set-up, and the [`SyncManager`] / [`SpvService`]
//! pair that turns peer messages into chain and wallet updates.

pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod storage;
pub mod sync;

pub use crate::config::SpvConfig;
pub use error::SyncError;
pub use service::{PeerEvent, SpvService};
pub use storage::RocksBackend;
pub use sync::{SyncManager, SyncSettings};
