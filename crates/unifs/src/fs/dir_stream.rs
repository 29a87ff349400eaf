//! The single-use directory stream.

use parking_lot::Mutex;

use crate::path::FsPath;
use crate::{Error, Result};

/// An accept-predicate applied lazily to each child path.
pub type DirectoryFilter = Box<dyn Fn(&FsPath) -> bool + Send>;

struct StreamState {
    /// Taken by the first `iter` call; `None` afterwards.
    entries: Option<Vec<FsPath>>,
    filter: Option<DirectoryFilter>,
    closed: bool,
}

/// A finite, single-use stream of a directory's child paths.
///
/// The listing is fetched once, under a scoped channel borrow; iteration
/// and filtering are lazy. A second `iter` call and iteration after
/// `close` are rejected.
pub struct DirectoryStream {
    state: Mutex<StreamState>,
}

impl DirectoryStream {
    pub(crate) fn new(entries: Vec<FsPath>, filter: Option<DirectoryFilter>) -> Self {
        DirectoryStream {
            state: Mutex::new(StreamState {
                entries: Some(entries),
                filter,
                closed: false,
            }),
        }
    }

    /// Starts the one allowed iteration.
    pub fn iter(&self) -> Result<DirectoryIter> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::invalid_argument("directory stream is closed"));
        }
        let entries = state
            .entries
            .take()
            .ok_or_else(|| Error::invalid_argument("directory stream already iterated"))?;
        Ok(DirectoryIter {
            entries: entries.into_iter(),
            filter: state.filter.take(),
        })
    }

    /// Closes the stream. An iterator already handed out finishes its
    /// snapshot; a later `iter` call fails.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.entries = None;
    }
}

/// Iterator over the accepted child paths.
pub struct DirectoryIter {
    entries: std::vec::IntoIter<FsPath>,
    filter: Option<DirectoryFilter>,
}

impl Iterator for DirectoryIter {
    type Item = FsPath;

    fn next(&mut self) -> Option<FsPath> {
        for entry in self.entries.by_ref() {
            let accepted = match &self.filter {
                Some(filter) => filter(&entry),
                None => true,
            };
            if accepted {
                return Some(entry);
            }
        }
        None
    }
}
