//! In-memory channel backends for `unifs`.
//!
//! Two complete [`Channel`](unifs::Channel) implementations cover the two
//! semantic families the dispatcher has to handle: an object-store flavor
//! with synthetic directories and recursive deletes, and a POSIX flavor
//! with a real node tree, permissions and symbolic links. Both double as
//! scratch filesystems and as the fixture for the integration suite, with
//! fault-injection hooks for pool and copy error paths.

#![forbid(unsafe_code)]

mod backend;
mod object;
mod posix;

pub use backend::{MemoryObjectBackend, MemoryPosixBackend};
pub use object::{MemoryObjectStore, ObjectStoreChannel, ObjectStoreFactory};
pub use posix::{MemoryPosixFs, PosixChannel, PosixChannelFactory};
