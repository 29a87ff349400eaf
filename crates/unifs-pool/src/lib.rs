//! A bounded pool of reusable objects, built for remote sessions.
//!
//! A [`Pool`] owns up to [`PoolConfig::max_size`] objects minted by a
//! [`Manager`]. Acquiring hands out a [`Lease`]; cloning the lease extends
//! the object's loan (for example, a stream derived from a channel keeps the
//! channel leased until the stream closes), and the object only goes back to
//! the idle queue when the last clone drops.

#![forbid(unsafe_code)]

mod config;
mod error;
mod pool;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::AcquireError;
pub use pool::{Lease, Manager, Pool, PoolStatus};
