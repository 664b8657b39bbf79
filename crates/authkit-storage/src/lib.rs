//! Namespaced credential storage for authkit
//!
//! Layers a fixed key-scoping scheme over an opaque key-value backing store.
//! Every read and write goes through `ContainerStorage`, which prefixes keys
//! so that several configured app instances can share one physical store
//! without their sessions colliding.
//!
//! Storage flow:
//! 1. Host picks a `StorageDriver` (memory, file, or its own secure storage)
//! 2. `ContainerStorage::new(driver)` wraps it with the scoping scheme
//! 3. Flows persist refresh tokens and anonymous key ids per namespace
//! 4. Writers take `ContainerStorage::lock()` to exclude concurrent flows

pub mod container;
pub mod driver;
pub mod error;
pub mod file;

pub use container::{ContainerStorage, NamespaceGuard, SCOPE_PREFIX};
pub use driver::{MemoryStorageDriver, StorageDriver};
pub use error::{Error, Result};
pub use file::FileStorageDriver;
