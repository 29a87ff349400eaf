//! The URI→filesystem map with its two-phase creation protocol.
//!
//! An entry is inserted *pending* before the (possibly slow) factory runs,
//! holding a per-entry lock whose write half the creator owns. Late
//! lookups briefly take the global lock, pick up the per-entry read half,
//! and block on that, so creating one filesystem never serializes
//! lookups of unrelated ones.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::{Error, Result};

enum Registration<T> {
    /// Creation in flight; the lock's write half is held by the creator.
    Pending(Arc<RwLock<()>>),
    Ready(T),
}

pub(crate) struct Registry<T: Clone> {
    entries: Mutex<HashMap<String, Registration<T>>>,
}

impl<T: Clone> Registry<T> {
    pub(crate) fn new() -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `key`, running `create` outside the global lock.
    ///
    /// Concurrent `get`/`remove` calls for the same key block until
    /// `create` finishes; on failure the pending entry is removed and the
    /// blocked callers observe the absence.
    pub(crate) fn add(&self, key: &str, create: impl FnOnce() -> Result<T>) -> Result<T> {
        let entry_lock = Arc::new(RwLock::new(()));
        let write_guard = entry_lock.write();
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(key) {
                return Err(Error::FileSystemAlreadyExists {
                    uri: key.to_string(),
                });
            }
            entries.insert(key.to_string(), Registration::Pending(entry_lock.clone()));
        }

        match create() {
            Ok(value) => {
                log::debug!("registered file system {key}");
                self.entries
                    .lock()
                    .insert(key.to_string(), Registration::Ready(value.clone()));
                drop(write_guard);
                Ok(value)
            }
            Err(e) => {
                log::debug!("file system creation failed for {key}");
                self.entries.lock().remove(key);
                // Releasing the write half wakes blocked lookups, which
                // re-read and observe the absence.
                drop(write_guard);
                Err(e)
            }
        }
    }

    /// Looks up `key`, waiting out an in-flight `add` for the same key.
    pub(crate) fn get(&self, key: &str) -> Result<T> {
        loop {
            let pending = {
                let entries = self.entries.lock();
                match entries.get(key) {
                    None => {
                        return Err(Error::FileSystemNotFound {
                            uri: key.to_string(),
                        });
                    }
                    Some(Registration::Ready(value)) => return Ok(value.clone()),
                    Some(Registration::Pending(lock)) => lock.clone(),
                }
            };
            // Block until the creator releases the write half, then look
            // again: the entry is now ready, absent, or pending under a
            // newer registration.
            drop(pending.read());
        }
    }

    /// Removes `key`, waiting out an in-flight `add` for the same key.
    ///
    /// Returns the removed value, or `None` when the entry disappeared
    /// while waiting (its creation failed).
    pub(crate) fn remove(&self, key: &str) -> Result<Option<T>> {
        loop {
            let pending = {
                let mut entries = self.entries.lock();
                match entries.remove(key) {
                    None => {
                        return Err(Error::FileSystemNotFound {
                            uri: key.to_string(),
                        });
                    }
                    Some(Registration::Ready(value)) => {
                        log::debug!("removed file system {key}");
                        return Ok(Some(value));
                    }
                    Some(Registration::Pending(lock)) => {
                        // The creator still needs its entry; put it back and
                        // wait for the creation to settle.
                        entries.insert(key.to_string(), Registration::Pending(lock.clone()));
                        lock
                    }
                }
            };
            drop(pending.read());
            let mut entries = self.entries.lock();
            match entries.remove(key) {
                None => return Ok(None),
                Some(Registration::Ready(value)) => {
                    log::debug!("removed file system {key}");
                    return Ok(Some(value));
                }
                Some(Registration::Pending(lock)) => {
                    // A newer registration slipped in; wait for that one too.
                    entries.insert(key.to_string(), Registration::Pending(lock));
                }
            }
        }
    }

    /// Snapshot of the registered keys, pending entries included.
    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}
