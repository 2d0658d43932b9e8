//! Abstract key-value store trait.
//!
//! Every store engine must implement [`KvStore`].  Handlers only see the
//! trait, so the engine can be swapped without touching the HTTP layer.

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`KvStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Async string key-value store contract.
pub trait KvStore: Send + Sync + 'static {
    /// Insert or overwrite the record at `key`.
    fn set(&self, key: &str, value: &str) -> StoreFuture<'_, ()>;

    /// Read the record at `key`, if any.
    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>>;

    /// Remove the record at `key`.  Removing a missing key is a no-op.
    fn rm(&self, key: &str) -> StoreFuture<'_, ()>;

    /// Remove every record.
    fn clear(&self) -> StoreFuture<'_, ()>;

    /// Check whether a record exists at `key`.
    fn exists(&self, key: &str) -> StoreFuture<'_, bool>;

    /// All records, ordered by key.
    fn entries(&self) -> StoreFuture<'_, Vec<(String, String)>>;

    /// Number of stored records.
    fn size(&self) -> StoreFuture<'_, usize>;
}
