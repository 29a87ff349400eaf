//! The POSIX flavor: a real node tree with permissions, principals,
//! symbolic links and a session working directory.
//!
//! Unlike the object-store flavor, directories exist explicitly, `mkdir`
//! creates a single level, deletes are not recursive, and listings echo
//! the `.` and `..` entries a real SFTP server returns.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use time::OffsetDateTime;

use unifs::attr::{FileType, PosixFileAttributes, PosixPermissions};
use unifs::{Channel, ChannelFactory, Error, FileEntry, OpenOptions, Result};

const MAX_LINK_DEPTH: usize = 40;

#[derive(Clone)]
struct Meta {
    permissions: PosixPermissions,
    owner: Option<String>,
    group: Option<String>,
    modified: Option<OffsetDateTime>,
    accessed: Option<OffsetDateTime>,
    created: Option<OffsetDateTime>,
}

impl Meta {
    fn new(mode: u32) -> Self {
        let now = OffsetDateTime::now_utc();
        Meta {
            permissions: PosixPermissions::from_mode(mode),
            owner: None,
            group: None,
            modified: Some(now),
            accessed: Some(now),
            created: Some(now),
        }
    }
}

#[derive(Clone)]
enum NodeKind {
    Directory,
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Clone)]
struct Node {
    kind: NodeKind,
    meta: Meta,
}

impl Node {
    fn directory() -> Self {
        Node {
            kind: NodeKind::Directory,
            meta: Meta::new(0o755),
        }
    }

    fn file(data: Vec<u8>) -> Self {
        Node {
            kind: NodeKind::File(data),
            meta: Meta::new(0o644),
        }
    }

    fn symlink(target: String) -> Self {
        Node {
            kind: NodeKind::Symlink(target),
            meta: Meta::new(0o777),
        }
    }

    fn attributes(&self) -> PosixFileAttributes {
        let (file_type, size) = match &self.kind {
            NodeKind::Directory => (FileType::Directory, 0),
            NodeKind::File(data) => (FileType::Regular, data.len() as u64),
            NodeKind::Symlink(target) => (FileType::SymbolicLink, target.len() as u64),
        };
        PosixFileAttributes {
            file_type,
            size,
            last_modified: self.meta.modified,
            last_access: self.meta.accessed,
            creation: self.meta.created,
            owner: self.meta.owner.clone(),
            group: self.meta.group.clone(),
            permissions: self.meta.permissions,
        }
    }
}

pub(crate) struct PosixInner {
    nodes: Mutex<BTreeMap<String, Node>>,
    working_dir: String,
    generation: AtomicU64,
    fail_next_create: AtomicBool,
    created_channels: AtomicUsize,
    closed_channels: AtomicUsize,
    keep_alive_probes: AtomicUsize,
}

/// An in-memory POSIX filesystem, shared by all channels minted for it.
#[derive(Clone)]
pub struct MemoryPosixFs {
    inner: Arc<PosixInner>,
}

impl MemoryPosixFs {
    /// An empty filesystem whose sessions report `working_dir` as their
    /// working directory. The working directory's parents are created.
    pub fn new(working_dir: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::directory());
        let mut partial = String::new();
        for segment in working_dir.split('/').filter(|s| !s.is_empty()) {
            partial.push('/');
            partial.push_str(segment);
            nodes.insert(partial.clone(), Node::directory());
        }
        MemoryPosixFs {
            inner: Arc::new(PosixInner {
                nodes: Mutex::new(nodes),
                working_dir: working_dir.to_string(),
                generation: AtomicU64::new(0),
                fail_next_create: AtomicBool::new(false),
                created_channels: AtomicUsize::new(0),
                closed_channels: AtomicUsize::new(0),
                keep_alive_probes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn working_dir(&self) -> &str {
        &self.inner.working_dir
    }

    /// A factory minting channels onto this filesystem.
    pub fn channel_factory(&self) -> PosixChannelFactory {
        PosixChannelFactory {
            inner: self.inner.clone(),
        }
    }

    /// Makes the next channel creation fail.
    pub fn fail_next_create(&self) {
        self.inner.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Invalidates every channel minted so far.
    pub fn invalidate_channels(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn created_channels(&self) -> usize {
        self.inner.created_channels.load(Ordering::SeqCst)
    }

    pub fn closed_channels(&self) -> usize {
        self.inner.closed_channels.load(Ordering::SeqCst)
    }

    /// How many keep-alive probes sessions have received.
    pub fn keep_alive_probes(&self) -> usize {
        self.inner.keep_alive_probes.load(Ordering::SeqCst)
    }

    /// Seeds a directory (single level, parent must exist).
    pub fn seed_dir(&self, path: &str) {
        self.inner
            .nodes
            .lock()
            .insert(path.to_string(), Node::directory());
    }

    /// Seeds a file.
    pub fn seed_file(&self, path: &str, data: &[u8]) {
        self.inner
            .nodes
            .lock()
            .insert(path.to_string(), Node::file(data.to_vec()));
    }

    /// Seeds a symbolic link.
    pub fn seed_symlink(&self, path: &str, target: &str) {
        self.inner
            .nodes
            .lock()
            .insert(path.to_string(), Node::symlink(target.to_string()));
    }

    /// Sets the owner and group reported for a path.
    pub fn seed_principals(&self, path: &str, owner: &str, group: &str) {
        if let Some(node) = self.inner.nodes.lock().get_mut(path) {
            node.meta.owner = Some(owner.to_string());
            node.meta.group = Some(group.to_string());
        }
    }
}

/// Mints [`PosixChannel`]s for one filesystem.
pub struct PosixChannelFactory {
    inner: Arc<PosixInner>,
}

impl ChannelFactory for PosixChannelFactory {
    fn create_channel(&self) -> Result<Box<dyn Channel>> {
        if self.inner.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(Error::from(std::io::Error::other(
                "injected connection failure",
            )));
        }
        self.inner.created_channels.fetch_add(1, Ordering::SeqCst);
        log::trace!("minting session channel");
        Ok(Box::new(PosixChannel {
            generation: self.inner.generation.load(Ordering::SeqCst),
            inner: self.inner.clone(),
        }))
    }
}

/// One session against the in-memory POSIX filesystem.
pub struct PosixChannel {
    inner: Arc<PosixInner>,
    generation: u64,
}

impl PosixChannel {
    fn parent_of(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) => "/",
            Some(i) => &path[..i],
            None => "/",
        }
    }

    /// Resolves the final component through symlinks.
    fn resolve(nodes: &BTreeMap<String, Node>, path: &str) -> Result<String> {
        let mut current = path.to_string();
        for _ in 0..MAX_LINK_DEPTH {
            match nodes.get(&current) {
                Some(Node {
                    kind: NodeKind::Symlink(target),
                    ..
                }) => {
                    current = if target.starts_with('/') {
                        target.clone()
                    } else {
                        let parent = Self::parent_of(&current);
                        if parent == "/" {
                            format!("/{target}")
                        } else {
                            format!("{parent}/{target}")
                        }
                    };
                }
                Some(_) => return Ok(current),
                None => return Err(Error::not_found(path)),
            }
        }
        Err(Error::io(
            path,
            std::io::Error::other("too many levels of symbolic links"),
        ))
    }

    fn require_parent_dir(nodes: &BTreeMap<String, Node>, path: &str) -> Result<()> {
        let parent = Self::parent_of(path);
        match nodes.get(parent) {
            Some(Node {
                kind: NodeKind::Directory,
                ..
            }) => Ok(()),
            Some(_) => Err(Error::not_a_directory(parent)),
            None => Err(Error::not_found(parent)),
        }
    }

    fn has_children(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn with_node<R>(
        &self,
        path: &str,
        op: impl FnOnce(&mut Node) -> Result<R>,
    ) -> Result<R> {
        let mut nodes = self.inner.nodes.lock();
        match nodes.get_mut(path) {
            Some(node) => op(node),
            None => Err(Error::not_found(path)),
        }
    }
}

impl Channel for PosixChannel {
    fn store_file(
        &self,
        path: &str,
        source: &mut dyn Read,
        options: &OpenOptions,
    ) -> Result<()> {
        let mut data = Vec::new();
        source.read_to_end(&mut data).map_err(|e| Error::io(path, e))?;
        let mut nodes = self.inner.nodes.lock();
        store_node(&mut nodes, path, data, options)
    }

    fn new_input_stream(
        &self,
        path: &str,
        _options: &OpenOptions,
    ) -> Result<Box<dyn Read + Send>> {
        let nodes = self.inner.nodes.lock();
        let resolved = Self::resolve(&nodes, path)?;
        match nodes.get(&resolved) {
            Some(Node {
                kind: NodeKind::File(data),
                ..
            }) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(_) => Err(Error::invalid_argument(format!("not a regular file: {path}"))),
            None => Err(Error::not_found(path)),
        }
    }

    fn new_output_stream(
        &self,
        path: &str,
        options: &OpenOptions,
    ) -> Result<Box<dyn Write + Send>> {
        let nodes = self.inner.nodes.lock();
        let exists = nodes.contains_key(path);
        if options.create_new && exists {
            return Err(Error::already_exists(path));
        }
        if !options.create && !options.create_new && !exists {
            return Err(Error::not_found(path));
        }
        Self::require_parent_dir(&nodes, path)?;
        let initial = if options.append {
            match nodes.get(path) {
                Some(Node {
                    kind: NodeKind::File(data),
                    ..
                }) => data.clone(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        Ok(Box::new(PosixWriter {
            inner: self.inner.clone(),
            path: path.to_string(),
            buffer: initial,
        }))
    }

    fn rename(&self, source: &str, target: &str) -> Result<()> {
        let mut nodes = self.inner.nodes.lock();
        if !nodes.contains_key(source) {
            return Err(Error::not_found(source));
        }
        Self::require_parent_dir(&nodes, target)?;
        let prefix = format!("{source}/");
        let subtree: Vec<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if let Some(node) = nodes.remove(source) {
            nodes.insert(target.to_string(), node);
        }
        for k in subtree {
            if let Some(node) = nodes.remove(&k) {
                let suffix = &k[prefix.len()..];
                nodes.insert(format!("{target}/{suffix}"), node);
            }
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let mut nodes = self.inner.nodes.lock();
        if nodes.contains_key(path) {
            return Err(Error::already_exists(path));
        }
        // Single level only; the parent must already exist.
        Self::require_parent_dir(&nodes, path)?;
        nodes.insert(path.to_string(), Node::directory());
        Ok(())
    }

    fn chown(&self, path: &str, owner: &str) -> Result<()> {
        self.with_node(path, |node| {
            node.meta.owner = Some(owner.to_string());
            Ok(())
        })
    }

    fn chgrp(&self, path: &str, group: &str) -> Result<()> {
        self.with_node(path, |node| {
            node.meta.group = Some(group.to_string());
            Ok(())
        })
    }

    fn chmod(&self, path: &str, permissions: PosixPermissions) -> Result<()> {
        self.with_node(path, |node| {
            node.meta.permissions = permissions;
            Ok(())
        })
    }

    fn delete(&self, path: &str, _is_directory: bool) -> Result<()> {
        let mut nodes = self.inner.nodes.lock();
        match nodes.get(path) {
            None => Err(Error::not_found(path)),
            Some(Node {
                kind: NodeKind::Directory,
                ..
            }) if Self::has_children(&nodes, path) => Err(Error::directory_not_empty(path)),
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
        }
    }

    fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        let nodes = self.inner.nodes.lock();
        let resolved = Self::resolve(&nodes, path)?;
        match nodes.get(&resolved) {
            Some(Node {
                kind: NodeKind::Directory,
                meta,
            }) => {
                // Real servers include the self and parent entries.
                let mut entries = vec![
                    FileEntry::new(
                        ".",
                        Node {
                            kind: NodeKind::Directory,
                            meta: meta.clone(),
                        }
                        .attributes(),
                    ),
                    FileEntry::new("..", Node::directory().attributes()),
                ];
                let prefix = if resolved == "/" {
                    "/".to_string()
                } else {
                    format!("{resolved}/")
                };
                for (k, node) in nodes.range(prefix.clone()..) {
                    if !k.starts_with(&prefix) {
                        break;
                    }
                    let remainder = &k[prefix.len()..];
                    if remainder.is_empty() || remainder.contains('/') {
                        continue;
                    }
                    entries.push(FileEntry::new(remainder, node.attributes()));
                }
                Ok(entries)
            }
            Some(_) => Err(Error::not_a_directory(path)),
            None => Err(Error::not_found(path)),
        }
    }

    fn read_attributes(&self, path: &str, follow_links: bool) -> Result<PosixFileAttributes> {
        let nodes = self.inner.nodes.lock();
        let resolved = if follow_links {
            Self::resolve(&nodes, path)?
        } else {
            path.to_string()
        };
        nodes
            .get(&resolved)
            .map(Node::attributes)
            .ok_or_else(|| Error::not_found(path))
    }

    fn set_mtime(&self, path: &str, time: OffsetDateTime) -> Result<()> {
        self.with_node(path, |node| {
            node.meta.modified = Some(time);
            Ok(())
        })
    }

    fn set_atime(&self, path: &str, time: OffsetDateTime) -> Result<()> {
        self.with_node(path, |node| {
            node.meta.accessed = Some(time);
            Ok(())
        })
    }

    fn keep_alive(&self) -> Result<()> {
        self.inner.keep_alive_probes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pwd(&self) -> Result<String> {
        Ok(self.inner.working_dir.clone())
    }

    fn read_symbolic_link(&self, path: &str) -> Result<String> {
        let nodes = self.inner.nodes.lock();
        match nodes.get(path) {
            Some(Node {
                kind: NodeKind::Symlink(target),
                ..
            }) => Ok(target.clone()),
            Some(_) => Err(Error::invalid_argument(format!(
                "not a symbolic link: {path}"
            ))),
            None => Err(Error::not_found(path)),
        }
    }

    fn validate(&self) -> bool {
        self.generation == self.inner.generation.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.closed_channels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn store_node(
    nodes: &mut BTreeMap<String, Node>,
    path: &str,
    data: Vec<u8>,
    options: &OpenOptions,
) -> Result<()> {
    let exists = nodes.contains_key(path);
    if options.create_new && exists {
        return Err(Error::already_exists(path));
    }
    if !options.create && !options.create_new && !exists {
        return Err(Error::not_found(path));
    }
    PosixChannel::require_parent_dir(nodes, path)?;
    match nodes.get_mut(path) {
        Some(Node {
            kind: NodeKind::Directory,
            ..
        }) => Err(Error::already_exists(path)),
        Some(node) if options.append => {
            if let NodeKind::File(existing) = &mut node.kind {
                existing.extend_from_slice(&data);
                node.meta.modified = Some(OffsetDateTime::now_utc());
            }
            Ok(())
        }
        Some(node) => {
            node.kind = NodeKind::File(data);
            node.meta.modified = Some(OffsetDateTime::now_utc());
            Ok(())
        }
        None => {
            nodes.insert(path.to_string(), Node::file(data));
            Ok(())
        }
    }
}

/// Buffers writes and commits the file when dropped.
struct PosixWriter {
    inner: Arc<PosixInner>,
    path: String,
    buffer: Vec<u8>,
}

impl Write for PosixWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for PosixWriter {
    fn drop(&mut self) {
        let mut nodes = self.inner.nodes.lock();
        let data = std::mem::take(&mut self.buffer);
        match nodes.get_mut(&self.path) {
            Some(node) => {
                node.kind = NodeKind::File(data);
                node.meta.modified = Some(OffsetDateTime::now_utc());
            }
            None => {
                nodes.insert(std::mem::take(&mut self.path), Node::file(data));
            }
        }
    }
}
