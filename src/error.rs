// src/error.rs
//! Error handling for the resource cache crate.
//!
//! Resource exhaustion is the only recoverable failure in this crate: the backend could not
//! create an object, a lazy request could not be resolved, or the cache could not free enough
//! budget. Contract violations (bad key domains, mutating a destroyed resource) are asserts.

use thiserror::Error;

use crate::gpu::proxy::ProxyId;

/// Main error type. Send + Sync + 'static so it can cross thread boundaries with the messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A request could not be backed by a GPU resource during planning or assignment.
    #[error("failed to instantiate {proxy:?}")]
    InstantiationFailed { proxy: ProxyId },

    /// Purging every purgeable resource would still not leave room for the new work.
    #[error("could not make {needed} bytes of budget headroom")]
    BudgetHeadroom { needed: usize },

    /// The allocator was driven out of order (e.g. `assign` before `plan_assignment`).
    #[error("allocator misuse: {0}")]
    AllocatorState(&'static str),

    /// The backend reported a failure it could describe.
    #[error("backend error: {0}")]
    Backend(String),

    /// The owning context was abandoned; nothing can be created any more.
    #[error("context abandoned")]
    Abandoned,
}

impl Error {
    /// Create a backend error from anything printable.
    #[inline]
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// True for the failures that mean "this batch of work could not be produced".
    #[inline]
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Error::InstantiationFailed { .. } | Error::BudgetHeadroom { .. } | Error::Backend(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
