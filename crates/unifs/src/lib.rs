//! A pluggable virtual filesystem layer for remote file and object stores.
//!
//! Remote stores (S3-compatible object services, SFTP servers) are
//! exposed behind one hierarchical [`FileSystem`]/[`FsPath`] abstraction:
//! open streams, list directories, copy and move entries, read and write
//! POSIX-style attributes, all with the operations a local filesystem
//! would offer.
//!
//! A backend implements the narrow [`Channel`] contract (one live remote
//! session); the dispatcher pools channels per filesystem, and a
//! per-provider registry maps normalized URIs to live filesystem
//! instances.

#![forbid(unsafe_code)]

pub mod attr;
pub mod channel;
pub mod duration;
pub mod env;
mod error;
pub mod fs;
pub mod options;
pub mod path;
pub mod provider;
mod registry;
pub mod uri;

pub use attr::{
    AttributeSelector, AttributeValue, AttributeView, FileType, PosixFileAttributes,
    PosixPermissions,
};
pub use channel::{Channel, ChannelFactory, FileEntry};
pub use duration::parse_duration;
pub use env::{EnvValue, FileSystemEnvironment, Protocol};
pub use error::Error;
pub use fs::{
    AccessMode, ByteChannel, ChannelInputStream, ChannelOutputStream, DirectoryFilter,
    DirectoryIter, DirectoryStream, FileSystem,
};
pub use options::{CopyOption, CopyOptions, OpenOption, OpenOptions};
pub use path::{FsPath, SEPARATOR};
pub use provider::{Backend, FileSystemProvider};
pub use uri::{Endpoint, Scheme};

// Re-exports of some dependencies for convenience
pub use unifs_pool as pool;
pub use url;

/// Result type of every filesystem operation.
pub type Result<T> = std::result::Result<T, Error>;
