//! The contract between the filesystem dispatcher and a backend.
//!
//! A channel is one live session against a remote store: one SSH
//! connection, one object-store client. Channels are pooled; the pool
//! guarantees a channel has a single user at a time, so implementations
//! need interior mutability but no cross-call synchronization. All paths
//! are absolute strings in the backend's own namespace.

use std::io::{Read, Write};

use time::OffsetDateTime;

use crate::attr::{PosixFileAttributes, PosixPermissions};
use crate::{Error, Result};

/// One entry from a directory listing.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub attributes: PosixFileAttributes,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, attributes: PosixFileAttributes) -> Self {
        FileEntry {
            name: name.into(),
            attributes,
        }
    }
}

/// A single reusable backend session.
///
/// Operations a backend cannot express default to
/// [`Error::UnsupportedOperation`].
pub trait Channel: Send {
    /// Writes the full contents of `source` to `path`.
    fn store_file(
        &self,
        path: &str,
        source: &mut dyn Read,
        options: &crate::OpenOptions,
    ) -> Result<()>;

    /// Opens `path` for reading.
    fn new_input_stream(
        &self,
        path: &str,
        options: &crate::OpenOptions,
    ) -> Result<Box<dyn Read + Send>>;

    /// Opens `path` for writing.
    fn new_output_stream(
        &self,
        path: &str,
        options: &crate::OpenOptions,
    ) -> Result<Box<dyn Write + Send>>;

    /// Renames `source` to `target`, atomically where the backend can.
    fn rename(&self, source: &str, target: &str) -> Result<()>;

    /// Creates a directory. Object stores create missing parents; SFTP
    /// creates a single level.
    fn mkdir(&self, path: &str) -> Result<()>;

    /// Sets the owning principal. Best effort on backends without full
    /// POSIX semantics.
    fn chown(&self, path: &str, owner: &str) -> Result<()> {
        let _ = (path, owner);
        Err(Error::unsupported("chown"))
    }

    /// Sets the owning group. Distinct from [`chown`][Channel::chown].
    fn chgrp(&self, path: &str, group: &str) -> Result<()> {
        let _ = (path, group);
        Err(Error::unsupported("chgrp"))
    }

    /// Sets the permission bits.
    fn chmod(&self, path: &str, permissions: PosixPermissions) -> Result<()> {
        let _ = (path, permissions);
        Err(Error::unsupported("chmod"))
    }

    /// Deletes `path`. Recursive on object stores, where directories are
    /// synthetic.
    fn delete(&self, path: &str, is_directory: bool) -> Result<()>;

    /// Lists the entries of a directory.
    fn list_files(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Reads the attributes of `path`, failing with [`Error::NotFound`]
    /// when it does not exist.
    fn read_attributes(&self, path: &str, follow_links: bool) -> Result<PosixFileAttributes>;

    fn set_mtime(&self, path: &str, time: OffsetDateTime) -> Result<()> {
        let _ = (path, time);
        Err(Error::unsupported("set modification time"))
    }

    fn set_atime(&self, path: &str, time: OffsetDateTime) -> Result<()> {
        let _ = (path, time);
        Err(Error::unsupported("set access time"))
    }

    fn set_ctime(&self, path: &str, time: OffsetDateTime) -> Result<()> {
        let _ = (path, time);
        Err(Error::unsupported("set creation time"))
    }

    /// Whether `path` exists: true iff an attribute read succeeds. A
    /// missing path is `false`; any other failure propagates.
    fn exists(&self, path: &str) -> Result<bool> {
        match self.read_attributes(path, true) {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The session's working directory, for backends that have one.
    fn pwd(&self) -> Result<String> {
        Err(Error::unsupported("pwd"))
    }

    /// Reads the target of a symbolic link.
    fn read_symbolic_link(&self, path: &str) -> Result<String> {
        let _ = path;
        Err(Error::unsupported("read symbolic link"))
    }

    /// Sends a liveness probe over the session, keeping it from idling
    /// out on the remote side. A no-op by default.
    fn keep_alive(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the underlying session is still usable. Consulted by the
    /// pool on acquisition; must not block.
    fn validate(&self) -> bool {
        true
    }

    /// Releases the backing session.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Mints channels for one filesystem instance.
pub trait ChannelFactory: Send + Sync + 'static {
    fn create_channel(&self) -> Result<Box<dyn Channel>>;
}

/// Adapts a [`ChannelFactory`] to the pool's manager contract.
pub(crate) struct ChannelManager {
    factory: Box<dyn ChannelFactory>,
}

impl ChannelManager {
    pub(crate) fn new(factory: Box<dyn ChannelFactory>) -> Self {
        ChannelManager { factory }
    }
}

impl unifs_pool::Manager for ChannelManager {
    type Object = Box<dyn Channel>;
    type Error = Error;

    fn create(&self) -> Result<Box<dyn Channel>> {
        self.factory.create_channel()
    }

    fn validate(&self, channel: &Box<dyn Channel>) -> bool {
        channel.as_ref().validate()
    }

    fn release(&self, mut channel: Box<dyn Channel>) -> Result<()> {
        channel.close()
    }
}
