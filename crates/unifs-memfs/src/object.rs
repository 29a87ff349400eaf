//! The object-store flavor: a flat key space with synthetic directories.
//!
//! Keys are the absolute path minus the leading slash. A directory exists
//! when a zero-length marker key ending in `/` exists, or implicitly when
//! any key lives under its prefix. Deletes on directories are recursive,
//! renames move whole key subtrees, and the POSIX-only calls (`chown`,
//! `chmod`, set-times) are unsupported, as they are on real object stores.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use time::OffsetDateTime;

use unifs::attr::{FileType, PosixFileAttributes, PosixPermissions};
use unifs::{Channel, ChannelFactory, Error, FileEntry, OpenOptions, Result};

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

#[derive(Clone)]
struct ObjectRecord {
    data: Vec<u8>,
    modified: OffsetDateTime,
}

impl ObjectRecord {
    fn new(data: Vec<u8>) -> Self {
        ObjectRecord {
            data,
            modified: OffsetDateTime::now_utc(),
        }
    }
}

pub(crate) struct StoreInner {
    objects: Mutex<BTreeMap<String, ObjectRecord>>,
    /// Channels from older generations fail validation.
    generation: AtomicU64,
    fail_next_create: AtomicBool,
    fail_next_store: AtomicBool,
    created_channels: AtomicUsize,
    closed_channels: AtomicUsize,
}

/// An in-memory S3-style object store shared by all channels minted for it.
#[derive(Clone)]
pub struct MemoryObjectStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        MemoryObjectStore {
            inner: Arc::new(StoreInner {
                objects: Mutex::new(BTreeMap::new()),
                generation: AtomicU64::new(0),
                fail_next_create: AtomicBool::new(false),
                fail_next_store: AtomicBool::new(false),
                created_channels: AtomicUsize::new(0),
                closed_channels: AtomicUsize::new(0),
            }),
        }
    }

    /// A factory minting channels onto this store.
    pub fn channel_factory(&self) -> ObjectStoreFactory {
        ObjectStoreFactory {
            inner: self.inner.clone(),
        }
    }

    /// Makes the next channel creation fail, for pool error-path tests.
    pub fn fail_next_create(&self) {
        self.inner.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Makes the next store operation fail, for copy error-path tests.
    pub fn fail_next_store(&self) {
        self.inner.fail_next_store.store(true, Ordering::SeqCst);
    }

    /// Invalidates every channel minted so far; the pool discards them on
    /// their next acquisition.
    pub fn invalidate_channels(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn created_channels(&self) -> usize {
        self.inner.created_channels.load(Ordering::SeqCst)
    }

    pub fn closed_channels(&self) -> usize {
        self.inner.closed_channels.load(Ordering::SeqCst)
    }

    /// Seeds an object directly, bypassing the channel interface.
    pub fn put_object(&self, key: &str, data: &[u8]) {
        self.inner
            .objects
            .lock()
            .insert(key.to_string(), ObjectRecord::new(data.to_vec()));
    }

    /// Whether a key (not a synthetic directory) exists.
    pub fn has_object(&self, key: &str) -> bool {
        self.inner.objects.lock().contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.inner.objects.lock().len()
    }
}

/// Mints [`ObjectStoreChannel`]s for one store.
pub struct ObjectStoreFactory {
    inner: Arc<StoreInner>,
}

impl ChannelFactory for ObjectStoreFactory {
    fn create_channel(&self) -> Result<Box<dyn Channel>> {
        if self.inner.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(Error::from(std::io::Error::other(
                "injected connection failure",
            )));
        }
        self.inner.created_channels.fetch_add(1, Ordering::SeqCst);
        log::trace!("minting object-store channel");
        Ok(Box::new(ObjectStoreChannel {
            generation: self.inner.generation.load(Ordering::SeqCst),
            inner: self.inner.clone(),
        }))
    }
}

/// One session against the in-memory object store.
pub struct ObjectStoreChannel {
    inner: Arc<StoreInner>,
    generation: u64,
}

impl ObjectStoreChannel {
    /// The object key of an absolute path.
    fn key(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    fn marker(key: &str) -> String {
        format!("{key}/")
    }

    fn file_attributes(record: &ObjectRecord) -> PosixFileAttributes {
        PosixFileAttributes {
            file_type: FileType::Regular,
            size: record.data.len() as u64,
            last_modified: Some(record.modified),
            last_access: None,
            creation: None,
            owner: None,
            group: None,
            permissions: PosixPermissions::from_mode(FILE_MODE),
        }
    }

    fn directory_attributes() -> PosixFileAttributes {
        PosixFileAttributes {
            file_type: FileType::Directory,
            size: 0,
            last_modified: None,
            last_access: None,
            creation: None,
            owner: None,
            group: None,
            permissions: PosixPermissions::from_mode(DIR_MODE),
        }
    }

    /// Whether `key` names a directory: the root, an explicit marker, or a
    /// prefix some object lives under.
    fn is_directory(objects: &BTreeMap<String, ObjectRecord>, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }
        let prefix = Self::marker(key);
        objects.contains_key(&prefix)
            || objects
                .range(prefix.clone()..)
                .next()
                .is_some_and(|(k, _)| k.starts_with(&prefix))
    }
}

impl Channel for ObjectStoreChannel {
    fn store_file(
        &self,
        path: &str,
        source: &mut dyn Read,
        options: &OpenOptions,
    ) -> Result<()> {
        if self.inner.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(Error::io(
                path,
                std::io::Error::other("injected store failure"),
            ));
        }
        if options.append {
            return Err(Error::unsupported("append to an object"));
        }
        let key = Self::key(path);
        {
            let objects = self.inner.objects.lock();
            if Self::is_directory(&objects, &key) {
                return Err(Error::already_exists(path));
            }
            let exists = objects.contains_key(&key);
            if options.create_new && exists {
                return Err(Error::already_exists(path));
            }
            if !options.create && !options.create_new && !exists {
                return Err(Error::not_found(path));
            }
        }
        let mut data = Vec::new();
        source.read_to_end(&mut data).map_err(|e| Error::io(path, e))?;
        self.inner.objects.lock().insert(key, ObjectRecord::new(data));
        Ok(())
    }

    fn new_input_stream(
        &self,
        path: &str,
        _options: &OpenOptions,
    ) -> Result<Box<dyn Read + Send>> {
        let key = Self::key(path);
        let objects = self.inner.objects.lock();
        match objects.get(&key) {
            Some(record) => Ok(Box::new(Cursor::new(record.data.clone()))),
            // A marker is a readable zero-length object.
            None if objects.contains_key(&Self::marker(&key)) => {
                Ok(Box::new(Cursor::new(Vec::new())))
            }
            None => Err(Error::not_found(path)),
        }
    }

    fn new_output_stream(
        &self,
        path: &str,
        options: &OpenOptions,
    ) -> Result<Box<dyn Write + Send>> {
        if options.append {
            return Err(Error::unsupported("append to an object"));
        }
        let key = Self::key(path);
        {
            let objects = self.inner.objects.lock();
            if Self::is_directory(&objects, &key) {
                return Err(Error::already_exists(path));
            }
            let exists = objects.contains_key(&key);
            if options.create_new && exists {
                return Err(Error::already_exists(path));
            }
            if !options.create && !options.create_new && !exists {
                return Err(Error::not_found(path));
            }
        }
        Ok(Box::new(ObjectWriter {
            inner: self.inner.clone(),
            key,
            buffer: Vec::new(),
        }))
    }

    fn rename(&self, source: &str, target: &str) -> Result<()> {
        let source_key = Self::key(source);
        let target_key = Self::key(target);
        let mut objects = self.inner.objects.lock();
        if let Some(record) = objects.remove(&source_key) {
            objects.insert(target_key, record);
            return Ok(());
        }
        if Self::is_directory(&objects, &source_key) {
            let prefix = Self::marker(&source_key);
            let keys: Vec<String> = objects
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            objects.insert(Self::marker(&target_key), ObjectRecord::new(Vec::new()));
            for k in keys {
                if let Some(record) = objects.remove(&k) {
                    let suffix = &k[prefix.len()..];
                    objects.insert(format!("{target_key}/{suffix}"), record);
                }
            }
            return Ok(());
        }
        Err(Error::not_found(source))
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let key = Self::key(path);
        if key.is_empty() {
            return Err(Error::already_exists(path));
        }
        let mut objects = self.inner.objects.lock();
        if objects.contains_key(&key) {
            return Err(Error::already_exists(path));
        }
        if objects.contains_key(&Self::marker(&key)) {
            return Err(Error::already_exists(path));
        }
        // Parents spring into existence, as object stores have no real
        // hierarchy to enforce.
        let mut partial = String::new();
        for segment in key.split('/') {
            partial.push_str(segment);
            partial.push('/');
            objects
                .entry(partial.clone())
                .or_insert_with(|| ObjectRecord::new(Vec::new()));
        }
        Ok(())
    }

    fn delete(&self, path: &str, is_directory: bool) -> Result<()> {
        let key = Self::key(path);
        let mut objects = self.inner.objects.lock();
        if is_directory {
            let prefix = Self::marker(&key);
            let doomed: Vec<String> = objects
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            let had_marker = objects.remove(&prefix).is_some();
            if doomed.is_empty() && !had_marker {
                return Err(Error::not_found(path));
            }
            for k in doomed {
                objects.remove(&k);
            }
            Ok(())
        } else if objects.remove(&key).is_some() {
            Ok(())
        } else {
            Err(Error::not_found(path))
        }
    }

    fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        let key = Self::key(path);
        let objects = self.inner.objects.lock();
        if !Self::is_directory(&objects, &key) {
            if objects.contains_key(&key) {
                return Err(Error::not_a_directory(path));
            }
            return Err(Error::not_found(path));
        }
        let prefix = if key.is_empty() {
            String::new()
        } else {
            Self::marker(&key)
        };
        let mut entries: BTreeMap<String, FileEntry> = BTreeMap::new();
        for (k, record) in objects.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            let remainder = &k[prefix.len()..];
            if remainder.is_empty() {
                continue;
            }
            match remainder.split_once('/') {
                // A deeper key: its first segment is a child directory.
                Some((name, _)) => {
                    entries.entry(name.to_string()).or_insert_with(|| {
                        FileEntry::new(name, Self::directory_attributes())
                    });
                }
                None => {
                    entries.insert(
                        remainder.to_string(),
                        FileEntry::new(remainder, Self::file_attributes(record)),
                    );
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    fn read_attributes(&self, path: &str, _follow_links: bool) -> Result<PosixFileAttributes> {
        let key = Self::key(path);
        let objects = self.inner.objects.lock();
        if Self::is_directory(&objects, &key) {
            return Ok(Self::directory_attributes());
        }
        objects
            .get(&key)
            .map(Self::file_attributes)
            .ok_or_else(|| Error::not_found(path))
    }

    fn validate(&self) -> bool {
        self.generation == self.inner.generation.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.closed_channels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Buffers writes and commits the object when dropped.
struct ObjectWriter {
    inner: Arc<StoreInner>,
    key: String,
    buffer: Vec<u8>,
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        self.inner.objects.lock().insert(
            std::mem::take(&mut self.key),
            ObjectRecord::new(std::mem::take(&mut self.buffer)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(store: &MemoryObjectStore) -> Box<dyn Channel> {
        store.channel_factory().create_channel().unwrap()
    }

    fn read_opts() -> OpenOptions {
        OpenOptions::for_new_input_stream(&[]).unwrap()
    }

    fn write_opts() -> OpenOptions {
        OpenOptions::for_new_output_stream(&[]).unwrap()
    }

    #[test]
    fn store_and_read_round_trip() {
        let store = MemoryObjectStore::new();
        let channel = channel(&store);
        channel
            .store_file("/d/f", &mut "hello".as_bytes(), &write_opts())
            .unwrap();

        let mut body = String::new();
        channel
            .new_input_stream("/d/f", &read_opts())
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "hello");

        let attributes = channel.read_attributes("/d/f", true).unwrap();
        assert_eq!(attributes.size, 5);
        assert!(attributes.file_type.is_regular_file());
    }

    #[test]
    fn prefix_keys_synthesize_directories() {
        let store = MemoryObjectStore::new();
        store.put_object("a/b/c", b"x");
        let channel = channel(&store);

        let attributes = channel.read_attributes("/a/b", true).unwrap();
        assert!(attributes.file_type.is_directory());
        assert!(!attributes.file_type.is_regular_file());
        assert!(channel.exists("/a").unwrap());
        assert!(!channel.exists("/a/nope").unwrap());
    }

    #[test]
    fn markers_are_directories_not_files() {
        let store = MemoryObjectStore::new();
        let channel = channel(&store);
        channel.mkdir("/d").unwrap();
        let attributes = channel.read_attributes("/d", true).unwrap();
        assert!(attributes.file_type.is_directory());
        assert!(!attributes.file_type.is_regular_file());
        assert!(store.has_object("d/"));
    }

    #[test]
    fn mkdir_creates_parents_and_rejects_duplicates() {
        let store = MemoryObjectStore::new();
        let channel = channel(&store);
        channel.mkdir("/a/b/c").unwrap();
        assert!(store.has_object("a/"));
        assert!(store.has_object("a/b/"));
        assert!(store.has_object("a/b/c/"));
        assert!(matches!(
            channel.mkdir("/a/b/c"),
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[test]
    fn listing_groups_by_prefix() {
        let store = MemoryObjectStore::new();
        store.put_object("a/x", b"1");
        store.put_object("a/y", b"2");
        store.put_object("a/sub/deep", b"3");
        let channel = channel(&store);

        let entries = channel.list_files("/a").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "x", "y"]);
        assert!(entries[0].attributes.file_type.is_directory());
        assert!(entries[1].attributes.file_type.is_regular_file());
    }

    #[test]
    fn listing_a_file_is_not_a_directory() {
        let store = MemoryObjectStore::new();
        store.put_object("f", b"1");
        let channel = channel(&store);
        assert!(matches!(
            channel.list_files("/f"),
            Err(Error::NotADirectory { .. })
        ));
        assert!(matches!(
            channel.list_files("/missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn delete_directory_is_recursive() {
        let store = MemoryObjectStore::new();
        store.put_object("a/x", b"1");
        store.put_object("a/sub/deep", b"2");
        let channel = channel(&store);
        channel.delete("/a", true).unwrap();
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn rename_moves_a_subtree() {
        let store = MemoryObjectStore::new();
        let channel = channel(&store);
        channel.mkdir("/a").unwrap();
        store.put_object("a/x", b"1");
        store.put_object("a/sub/deep", b"2");

        channel.rename("/a", "/b").unwrap();
        assert!(store.has_object("b/x"));
        assert!(store.has_object("b/sub/deep"));
        assert!(!store.has_object("a/x"));
        assert!(channel.read_attributes("/b", true).unwrap().file_type.is_directory());
    }

    #[test]
    fn posix_calls_are_unsupported() {
        let store = MemoryObjectStore::new();
        let channel = channel(&store);
        store.put_object("f", b"1");
        assert!(matches!(
            channel.chmod("/f", PosixPermissions::from_mode(0o600)),
            Err(Error::UnsupportedOperation { .. })
        ));
        assert!(matches!(
            channel.chown("/f", "alice"),
            Err(Error::UnsupportedOperation { .. })
        ));
        assert!(matches!(channel.pwd(), Err(Error::UnsupportedOperation { .. })));
    }

    #[test]
    fn create_new_and_missing_create_are_enforced() {
        let store = MemoryObjectStore::new();
        let channel = channel(&store);
        store.put_object("f", b"1");

        let create_new =
            OpenOptions::for_new_output_stream(&[unifs::OpenOption::CreateNew]).unwrap();
        assert!(matches!(
            channel.new_output_stream("/f", &create_new),
            Err(Error::AlreadyExists { .. })
        ));

        let plain_write = OpenOptions::for_new_output_stream(&[unifs::OpenOption::Write]).unwrap();
        assert!(matches!(
            channel.new_output_stream("/missing", &plain_write),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn invalidated_channels_fail_validation() {
        let store = MemoryObjectStore::new();
        let channel = channel(&store);
        assert!(channel.validate());
        store.invalidate_channels();
        assert!(!channel.validate());
    }
}
