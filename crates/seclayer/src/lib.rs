//! Two-party secure evaluation of neural-network layer operators over additively
//! secret-shared tensors.
//!
//! A computation starts with [`SessionContext::start`](session::SessionContext::start), which
//! performs the base setup on every channel and selects a [`LayerBackend`](backend::LayerBackend)
//! for the configured domain. The layer operators in [`ops`] take the session by mutable
//! reference, read the caller's shares and write the resulting shares into caller supplied
//! output buffers.
pub use config::{BackendKind, SessionConfig};
pub use domain::{Domain, DomainKind};
pub use party::Party;
pub use session::{SessionContext, SessionReport};

pub mod backend;
pub mod config;
pub mod domain;
pub mod errors;
pub mod metrics;
pub mod ops;
pub mod party;
pub mod plaintext;
pub mod primitives;
#[cfg(any(test, feature = "_integration_tests"))]
#[doc(hidden)]
/// Do **not** use items from this module. They are intended for integration tests and must
/// therefore be public.
pub mod private_test_utils;
pub mod reshape;
pub mod session;
pub mod telemetry;
pub mod verify;

/// Upper bound on the number of worker instances (and channels) of a session.
pub const MAX_THREADS: usize = 16;
