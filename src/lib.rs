//! nkv library: an eventually-consistent in-memory key-value mesh.
//!
//! Each node serves a small HTTP API over an in-memory store.  When a
//! bootstrap URL is configured, nodes discover each other through periodic
//! gossip and replicate every successful mutation to their live peers.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod mesh;
pub mod metrics;
pub mod server;
pub mod storage;

use crate::config::Config;
use crate::mesh::MeshService;
use crate::storage::backend::KvStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Record store.
    pub store: Arc<dyn KvStore>,
    /// Mesh membership and replication; `None` when running alone.
    pub mesh: Option<Arc<MeshService>>,
}
