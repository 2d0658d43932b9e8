//! Record storage.
//!
//! The [`backend::KvStore`] trait abstracts over where records live.  The
//! only implementation is [`memory::MemoryStore`]; nothing is persisted.

pub mod backend;
pub mod memory;
