//! HTTP API handlers.
//!
//! Handlers receive the shared [`crate::AppState`] and the decoded query
//! parameters; routing and query parsing live in [`crate::server`].

pub mod kv;
pub mod node;
pub mod validators;
