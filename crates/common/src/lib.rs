//! Common types shared by the authkit crates

mod error;
mod future;
mod secret;

pub use error::{Error, Result};
pub use future::BoxFuture;
pub use secret::Secret;
