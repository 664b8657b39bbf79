//! Authorization flow orchestration
//!
//! The `Container` is the handle an application holds. It runs each flow
//! through the state machine in `state`, suspends on the host's `UiSurface`
//! for the interactive step, and persists the resulting session through the
//! namespaced token store.
//!
//! Flow lifecycle:
//! 1. Host builds a `Container` from `ContainerParts` and calls `configure()`
//! 2. A flow (`authorize`, `authenticate_anonymously`, ...) builds its request
//! 3. Interactive flows wait on `UiSurface::open_authorization_url()`
//! 4. The code or assertion is exchanged and the session written last

pub mod container;
pub mod metrics;
pub mod state;
pub mod ui;

pub use authkit_auth::{Error, Result};
pub use container::{
    AuthorizeOptions, AuthorizeResult, Container, ContainerConfig, ContainerParts,
    DEFAULT_NAMESPACE, PromoteOptions, SsoOptions,
};
pub use state::{FlowEvent, FlowState, FlowVariant, handle_event};
pub use ui::{OpenAuthorizationUrlOptions, UiSurface};
