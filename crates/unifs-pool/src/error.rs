use thiserror::Error;

/// Why an acquisition from a [`Pool`][crate::Pool] failed.
#[derive(Debug, Error)]
pub enum AcquireError<E> {
    /// The pool has been shut down; no new acquisitions succeed.
    #[error("pool has been shut down")]
    Shutdown,

    /// The pool stayed saturated for the whole wait time.
    #[error("timed out waiting for a pool object")]
    Timeout,

    /// The manager failed to create a new object. The reserved slot has
    /// already been given back to the pool.
    #[error("failed to create a pool object: {0}")]
    Create(#[source] E),
}

impl<E> AcquireError<E> {
    /// Maps the creation error, preserving the other variants.
    pub fn map_create<F>(self, op: impl FnOnce(E) -> F) -> AcquireError<F> {
        match self {
            AcquireError::Shutdown => AcquireError::Shutdown,
            AcquireError::Timeout => AcquireError::Timeout,
            AcquireError::Create(e) => AcquireError::Create(op(e)),
        }
    }
}
