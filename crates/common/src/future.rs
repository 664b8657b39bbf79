//! Boxed future alias for dyn-compatible async traits

use std::future::Future;
use std::pin::Pin;

/// Future returned by collaborator traits that are used as `Arc<dyn Trait>`.
///
/// Async fns in traits are not dyn-compatible, so the storage driver, keystore,
/// network client and UI surface traits return this instead.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
