//! Streams that keep their channel leased until they close.
//!
//! The lease clone inside each stream is what defers the channel's return
//! to the pool: the borrowing caller can drop its own handle immediately
//! after opening the stream, and the session is recycled only once the
//! stream is done with it.

use std::io::{Read, Write};

use super::ChannelLease;
use crate::Result;

/// A read stream over a remote file.
pub struct ChannelInputStream {
    inner: Box<dyn Read + Send>,
    lease: ChannelLease,
    delete_on_close: Option<String>,
    closed: bool,
}

impl ChannelInputStream {
    pub(crate) fn new(
        inner: Box<dyn Read + Send>,
        lease: ChannelLease,
        delete_on_close: Option<String>,
    ) -> Self {
        ChannelInputStream {
            inner,
            lease,
            delete_on_close,
            closed: false,
        }
    }

    /// Closes the stream, deleting the file if the stream was opened with
    /// `DELETE_ON_CLOSE`, and returns the channel to the pool. Dropping
    /// the stream does the same but can only log failures.
    pub fn close(mut self) -> Result<()> {
        self.close_impl()
    }

    fn close_impl(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(path) = self.delete_on_close.take() {
            log::trace!("delete-on-close of {path}");
            self.lease.delete(&path, false)?;
        }
        Ok(())
    }
}

impl Read for ChannelInputStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for ChannelInputStream {
    fn drop(&mut self) {
        if let Err(e) = self.close_impl() {
            log::warn!("failed to close input stream: {e}");
        }
    }
}

/// A write stream over a remote file.
pub struct ChannelOutputStream {
    inner: Option<Box<dyn Write + Send>>,
    lease: ChannelLease,
    delete_on_close: Option<String>,
}

impl ChannelOutputStream {
    pub(crate) fn new(
        inner: Box<dyn Write + Send>,
        lease: ChannelLease,
        delete_on_close: Option<String>,
    ) -> Self {
        ChannelOutputStream {
            inner: Some(inner),
            lease,
            delete_on_close,
        }
    }

    /// Flushes and finalizes the write, deletes the file if the stream was
    /// opened with `DELETE_ON_CLOSE`, and returns the channel to the pool.
    pub fn close(mut self) -> Result<()> {
        self.close_impl()
    }

    fn close_impl(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        inner.flush()?;
        // Dropping the backend writer finalizes the stored object.
        drop(inner);
        if let Some(path) = self.delete_on_close.take() {
            log::trace!("delete-on-close of {path}");
            self.lease.delete(&path, false)?;
        }
        Ok(())
    }
}

impl Write for ChannelOutputStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            Some(inner) => inner.write(buf),
            None => Err(std::io::Error::other("stream is closed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ChannelOutputStream {
    fn drop(&mut self) {
        if let Err(e) = self.close_impl() {
            log::warn!("failed to close output stream: {e}");
        }
    }
}

/// A byte channel opened for one direction only; no backend supports
/// in-place seek, so reads and writes never mix.
pub enum ByteChannel {
    Reading(ChannelInputStream),
    Writing(ChannelOutputStream),
}

impl ByteChannel {
    pub fn is_read_only(&self) -> bool {
        matches!(self, ByteChannel::Reading(_))
    }

    pub fn is_write_only(&self) -> bool {
        matches!(self, ByteChannel::Writing(_))
    }

    /// Closes whichever side is open.
    pub fn close(self) -> Result<()> {
        match self {
            ByteChannel::Reading(stream) => stream.close(),
            ByteChannel::Writing(stream) => stream.close(),
        }
    }
}

impl Read for ByteChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ByteChannel::Reading(stream) => stream.read(buf),
            ByteChannel::Writing(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "channel is write-only",
            )),
        }
    }
}

impl Write for ByteChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ByteChannel::Writing(stream) => stream.write(buf),
            ByteChannel::Reading(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "channel is read-only",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ByteChannel::Writing(stream) => stream.flush(),
            ByteChannel::Reading(_) => Ok(()),
        }
    }
}
