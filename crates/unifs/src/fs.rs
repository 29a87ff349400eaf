//! The filesystem dispatcher.
//!
//! Every operation follows the same skeleton: borrow a channel from the
//! pool for a bounded scope, issue one or more channel calls against the
//! backend path, and translate failures into path-qualified errors. The
//! exceptions are the stream constructors, which move their lease into the
//! returned stream so the channel only goes back to the pool when the
//! stream closes.

use std::collections::BTreeMap;
use std::sync::Arc;

use unifs_pool::{Lease, Pool, PoolConfig};

use crate::attr::{
    AttributeSelector, AttributeValue, PosixFileAttributes, PosixPermissions, SetOperation,
};
use crate::channel::{ChannelFactory, ChannelManager};
use crate::options::{CopyOption, CopyOptions, OpenOption, OpenOptions};
use crate::path::{FsPath, normalize_string};
use crate::uri::Scheme;
use crate::{Error, Result};

mod dir_stream;
mod stream;

pub use dir_stream::{DirectoryFilter, DirectoryIter, DirectoryStream};
pub use stream::{ByteChannel, ChannelInputStream, ChannelOutputStream};

pub(crate) type ChannelLease = Lease<ChannelManager>;

/// The access kinds checked by [`FileSystem::check_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

struct FsInner {
    scheme: Scheme,
    endpoint: String,
    default_dir: String,
    pool: Pool<ChannelManager>,
}

/// One live virtual filesystem: a pool of channels rooted at an endpoint.
///
/// Cloning is cheap and shares the instance; paths compare equal only
/// within one instance.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<FsInner>,
}

impl FileSystem {
    /// Builds a filesystem over a channel factory. The pool is filled
    /// eagerly per its configuration, so a bad endpoint fails here.
    pub(crate) fn create(
        scheme: Scheme,
        endpoint: String,
        default_dir: &str,
        factory: Box<dyn ChannelFactory>,
        config: PoolConfig,
    ) -> Result<FileSystem> {
        let default_dir = normalize_string(default_dir)?;
        if !default_dir.starts_with('/') {
            return Err(Error::invalid_argument(
                "default directory must be absolute",
            ));
        }
        let pool = Pool::new(ChannelManager::new(factory), config)?;
        log::debug!("opened file system {endpoint}");
        Ok(FileSystem {
            inner: Arc::new(FsInner {
                scheme,
                endpoint,
                default_dir,
                pool,
            }),
        })
    }

    /// The scheme this filesystem was registered under.
    pub fn scheme(&self) -> Scheme {
        self.inner.scheme
    }

    /// The normalized endpoint string this filesystem is keyed by.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// The separator of every virtual filesystem.
    pub fn separator(&self) -> &'static str {
        "/"
    }

    /// The directory relative paths resolve against.
    pub fn default_directory(&self) -> &str {
        &self.inner.default_dir
    }

    /// Builds a path on this filesystem.
    pub fn path(&self, raw: &str) -> Result<FsPath> {
        FsPath::new(self.clone(), raw)
    }

    /// Whether the filesystem still accepts operations.
    pub fn is_open(&self) -> bool {
        self.inner.pool.is_active()
    }

    /// Probes every idle channel so remote sessions do not idle out.
    /// Channels currently leased out are skipped; they are live by
    /// definition.
    pub fn keep_alive(&self) -> Result<()> {
        self.inner
            .pool
            .for_all_idle_objects(|channel| channel.keep_alive())
    }

    /// Closes the filesystem: shuts the channel pool down and releases
    /// every idle channel. Idempotent. Channels leased out by open streams
    /// stay usable and are released when those streams close.
    pub fn close(&self) -> Result<()> {
        log::debug!("closing file system {}", self.inner.endpoint);
        self.inner.pool.shutdown()
    }

    pub(crate) fn same_instance(&self, other: &FileSystem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn channel(&self) -> Result<ChannelLease> {
        self.inner.pool.acquire().map_err(Error::from)
    }

    /// A second channel for operations that read and write concurrently.
    /// Never blocks on saturation: mints an unpooled channel instead, so a
    /// same-filesystem copy cannot deadlock on a pool of one.
    fn extra_channel(&self) -> Result<ChannelLease> {
        self.inner.pool.acquire_or_create().map_err(Error::from)
    }

    fn require_same_fs(&self, path: &FsPath) -> Result<()> {
        if self.same_instance(path.file_system()) {
            Ok(())
        } else {
            Err(Error::ProviderMismatch)
        }
    }

    /// Joins a relative path against the default directory.
    pub(crate) fn absolute_path(&self, path: &FsPath) -> FsPath {
        if path.is_absolute() {
            return path.clone();
        }
        let base = FsPath::new(self.clone(), &self.inner.default_dir)
            .expect("default directory is validated at creation");
        base.resolve(path)
    }

    /// The canonical existing path, following symbolic links if asked to.
    pub(crate) fn real_path(&self, path: &FsPath, follow_links: bool) -> Result<FsPath> {
        self.require_same_fs(path)?;
        let lease = self.channel()?;
        let resolved = self
            .resolve_real(&lease, self.backend_path(path), follow_links)
            .map_err(|e| e.for_path(path.as_str()))?;
        self.path(&resolved)
    }

    fn resolve_real(
        &self,
        lease: &ChannelLease,
        start: String,
        follow_links: bool,
    ) -> Result<String> {
        const MAX_LINK_DEPTH: usize = 40;
        let mut current = start;
        for _ in 0..MAX_LINK_DEPTH {
            let attributes = lease.read_attributes(&current, false)?;
            if !follow_links || !attributes.file_type.is_symbolic_link() {
                return Ok(current);
            }
            let link = lease.read_symbolic_link(&current)?;
            let here = self.path(&current)?;
            let parent = here.parent().unwrap_or(here);
            current = parent.resolve(&self.path(&link)?).normalize().as_str().to_string();
        }
        Err(Error::io(
            current,
            std::io::Error::other("too many levels of symbolic links"),
        ))
    }

    /// The absolute, normalized backend path for a channel call.
    fn backend_path(&self, path: &FsPath) -> String {
        self.absolute_path(path).normalize().as_str().to_string()
    }

    /// Opens a read stream. The returned stream keeps the channel leased
    /// until it closes.
    pub fn new_input_stream(
        &self,
        path: &FsPath,
        options: &[OpenOption],
    ) -> Result<ChannelInputStream> {
        self.require_same_fs(path)?;
        let normalized = OpenOptions::for_new_input_stream(options)?;
        self.open_input(path, normalized)
    }

    fn open_input(&self, path: &FsPath, options: OpenOptions) -> Result<ChannelInputStream> {
        let target = self.backend_path(path);
        let lease = self.channel()?;
        log::trace!("opening {target} for reading");
        let inner = lease
            .new_input_stream(&target, &options)
            .map_err(|e| e.for_path(path.as_str()))?;
        let delete_on_close = options.delete_on_close.then_some(target);
        Ok(ChannelInputStream::new(inner, lease, delete_on_close))
    }

    /// Opens a write stream. The returned stream keeps the channel leased
    /// until it closes.
    pub fn new_output_stream(
        &self,
        path: &FsPath,
        options: &[OpenOption],
    ) -> Result<ChannelOutputStream> {
        self.require_same_fs(path)?;
        let normalized = OpenOptions::for_new_output_stream(options)?;
        self.open_output(path, normalized)
    }

    fn open_output(&self, path: &FsPath, options: OpenOptions) -> Result<ChannelOutputStream> {
        let target = self.backend_path(path);
        let lease = self.channel()?;
        log::trace!("opening {target} for writing");
        let inner = lease
            .new_output_stream(&target, &options)
            .map_err(|e| e.for_path(path.as_str()))?;
        let delete_on_close = options.delete_on_close.then_some(target);
        Ok(ChannelOutputStream::new(inner, lease, delete_on_close))
    }

    /// Opens a byte channel: read-only or write-only, since no backend
    /// supports in-place seek. Option conflicts fail before any remote
    /// call.
    pub fn new_byte_channel(&self, path: &FsPath, options: &[OpenOption]) -> Result<ByteChannel> {
        self.require_same_fs(path)?;
        let normalized = OpenOptions::for_new_byte_channel(options)?;
        if normalized.read {
            Ok(ByteChannel::Reading(self.open_input(path, normalized)?))
        } else {
            Ok(ByteChannel::Writing(self.open_output(path, normalized)?))
        }
    }

    /// Creates a directory.
    pub fn create_directory(&self, path: &FsPath) -> Result<()> {
        self.require_same_fs(path)?;
        let target = self.backend_path(path);
        let lease = self.channel()?;
        log::trace!("mkdir {target}");
        lease.mkdir(&target).map_err(|e| e.for_path(path.as_str()))
    }

    /// Deletes a file or directory.
    pub fn delete(&self, path: &FsPath) -> Result<()> {
        self.require_same_fs(path)?;
        let target = self.backend_path(path);
        let lease = self.channel()?;
        let attributes = lease
            .read_attributes(&target, false)
            .map_err(|e| e.for_path(path.as_str()))?;
        log::trace!("delete {target}");
        lease
            .delete(&target, attributes.file_type.is_directory())
            .map_err(|e| e.for_path(path.as_str()))
    }

    /// Whether the path exists: true iff an attribute read succeeds.
    pub fn exists(&self, path: &FsPath) -> Result<bool> {
        self.require_same_fs(path)?;
        let target = self.backend_path(path);
        let lease = self.channel()?;
        lease.exists(&target).map_err(|e| e.for_path(path.as_str()))
    }

    /// Reads the POSIX attribute record of a path.
    pub fn read_attributes(
        &self,
        path: &FsPath,
        follow_links: bool,
    ) -> Result<PosixFileAttributes> {
        self.require_same_fs(path)?;
        let target = self.backend_path(path);
        let lease = self.channel()?;
        lease
            .read_attributes(&target, follow_links)
            .map_err(|e| e.for_path(path.as_str()))
    }

    /// Reads attributes selected by a `view:name[,name…]` selector,
    /// projected into exactly the requested subset. A bad selector fails
    /// before any remote call.
    pub fn read_attributes_map(
        &self,
        path: &FsPath,
        selector: &str,
        follow_links: bool,
    ) -> Result<BTreeMap<String, AttributeValue>> {
        let selector = AttributeSelector::parse(selector)?;
        let attributes = self.read_attributes(path, follow_links)?;
        Ok(selector.project(&attributes))
    }

    /// Sets one writable attribute named by a `view:name` selector.
    pub fn set_attribute(
        &self,
        path: &FsPath,
        selector: &str,
        value: AttributeValue,
    ) -> Result<()> {
        self.require_same_fs(path)?;
        let (_, name, operation) = AttributeSelector::parse_for_write(selector)?;
        let target = self.backend_path(path);
        let lease = self.channel()?;
        let result = match (operation, value) {
            (SetOperation::LastModified, AttributeValue::Time(Some(time))) => {
                lease.set_mtime(&target, time)
            }
            (SetOperation::LastAccess, AttributeValue::Time(Some(time))) => {
                lease.set_atime(&target, time)
            }
            (SetOperation::Creation, AttributeValue::Time(Some(time))) => {
                lease.set_ctime(&target, time)
            }
            (SetOperation::Owner, AttributeValue::Principal(Some(owner))) => {
                lease.chown(&target, &owner)
            }
            (SetOperation::Group, AttributeValue::Principal(Some(group))) => {
                lease.chgrp(&target, &group)
            }
            (SetOperation::Permissions, AttributeValue::Permissions(permissions)) => {
                lease.chmod(&target, permissions)
            }
            _ => Err(Error::invalid_argument(format!(
                "invalid value for attribute {name}"
            ))),
        };
        result.map_err(|e| e.for_path(path.as_str()))
    }

    /// Convenience setter for the permission bits.
    pub fn set_permissions(&self, path: &FsPath, permissions: PosixPermissions) -> Result<()> {
        self.set_attribute(
            path,
            "posix:permissions",
            AttributeValue::Permissions(permissions),
        )
    }

    /// Checks that the owner's permission bits grant every requested
    /// access mode. With no modes this is a bare existence check.
    pub fn check_access(&self, path: &FsPath, modes: &[AccessMode]) -> Result<()> {
        let attributes = self.read_attributes(path, true)?;
        for mode in modes {
            let required = match mode {
                AccessMode::Read => PosixPermissions::OWNER_READ,
                AccessMode::Write => PosixPermissions::OWNER_WRITE,
                AccessMode::Execute => PosixPermissions::OWNER_EXECUTE,
            };
            if !attributes.permissions.contains(required) {
                return Err(Error::access_denied(path.as_str()));
            }
        }
        Ok(())
    }

    /// Reads the target of a symbolic link.
    pub fn read_symbolic_link(&self, path: &FsPath) -> Result<FsPath> {
        self.require_same_fs(path)?;
        let target = self.backend_path(path);
        let lease = self.channel()?;
        let link = lease
            .read_symbolic_link(&target)
            .map_err(|e| e.for_path(path.as_str()))?;
        self.path(&link)
    }

    /// Lists a directory as a lazy, single-use stream of child paths.
    pub fn new_directory_stream(
        &self,
        path: &FsPath,
        filter: Option<DirectoryFilter>,
    ) -> Result<DirectoryStream> {
        self.require_same_fs(path)?;
        let target = self.backend_path(path);
        let children = {
            let lease = self.channel()?;
            let attributes = lease
                .read_attributes(&target, true)
                .map_err(|e| e.for_path(path.as_str()))?;
            if !attributes.file_type.is_directory() {
                return Err(Error::not_a_directory(path.as_str()));
            }
            lease.list_files(&target).map_err(|e| e.for_path(path.as_str()))?
        };
        let mut paths = Vec::with_capacity(children.len());
        for entry in children {
            // Backends may echo the synthetic self/parent entries.
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            paths.push(path.resolve_str(&entry.name)?);
        }
        Ok(DirectoryStream::new(paths, filter))
    }

    /// Copies `source` to `target`. Directories are copied shallowly: the
    /// target directory is created and the caller walks the children.
    pub fn copy(&self, source: &FsPath, target: &FsPath, options: &[CopyOption]) -> Result<()> {
        self.transfer(source, target, options, false)
    }

    /// Moves `source` to `target`: a rename within one filesystem, a copy
    /// followed by a source delete across filesystems.
    pub fn move_to(&self, source: &FsPath, target: &FsPath, options: &[CopyOption]) -> Result<()> {
        self.transfer(source, target, options, true)
    }

    fn transfer(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyOption],
        is_move: bool,
    ) -> Result<()> {
        self.require_same_fs(source)?;
        let same_fs = source.same_file_system(target);
        let options = if is_move {
            CopyOptions::for_move(same_fs, options)?
        } else {
            CopyOptions::for_copy(options)?
        };
        if same_fs {
            self.transfer_within(source, target, &options, is_move)
        } else {
            self.transfer_across(source, target, &options, is_move)
        }
    }

    fn transfer_within(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &CopyOptions,
        is_move: bool,
    ) -> Result<()> {
        let src = self.backend_path(source);
        let dst = self.backend_path(target);
        if src == dst {
            return Ok(());
        }
        let lease = self.channel()?;
        // Equal real paths (one a link to the other) are a no-op too.
        if let (Ok(src_real), Ok(dst_real)) = (
            self.resolve_real(&lease, src.clone(), true),
            self.resolve_real(&lease, dst.clone(), true),
        ) {
            if src_real == dst_real {
                return Ok(());
            }
        }
        let source_attributes = lease
            .read_attributes(&src, false)
            .map_err(|e| e.for_path(source.as_str()))?;
        prepare_target(&lease, &dst, target, options)?;
        if is_move {
            log::debug!("rename {src} -> {dst}");
            return lease
                .rename(&src, &dst)
                .map_err(|e| e.for_path(source.as_str()));
        }
        if source_attributes.file_type.is_directory() {
            lease.mkdir(&dst).map_err(|e| e.for_path(target.as_str()))
        } else {
            log::debug!("copy {src} -> {dst}");
            // Read through a second channel so a single session never
            // carries an in-flight read and write at once.
            let reader = self.extra_channel()?;
            let mut input = reader
                .new_input_stream(&src, &OpenOptions::for_new_input_stream(&[])?)
                .map_err(|e| e.for_path(source.as_str()))?;
            lease
                .store_file(&dst, &mut input, &OpenOptions::for_new_output_stream(&[])?)
                .map_err(|e| e.for_path(target.as_str()))
        }
    }

    fn transfer_across(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &CopyOptions,
        is_move: bool,
    ) -> Result<()> {
        let target_fs = target.file_system();
        let src = self.backend_path(source);
        let dst = target_fs.backend_path(target);
        let source_lease = self.channel()?;
        let target_lease = target_fs.channel()?;

        let source_attributes = source_lease
            .read_attributes(&src, false)
            .map_err(|e| e.for_path(source.as_str()))?;
        if source_attributes.file_type.is_symbolic_link() {
            return Err(Error::unsupported(
                "copy a symbolic link across file systems",
            ));
        }
        prepare_target(&target_lease, &dst, target, options)?;

        if source_attributes.file_type.is_directory() {
            target_lease
                .mkdir(&dst)
                .map_err(|e| e.for_path(target.as_str()))?;
        } else {
            log::debug!("copy {src} -> {} across file systems", target_fs.endpoint());
            let mut input = source_lease
                .new_input_stream(&src, &OpenOptions::for_new_input_stream(&[])?)
                .map_err(|e| e.for_path(source.as_str()))?;
            target_lease
                .store_file(&dst, &mut input, &OpenOptions::for_new_output_stream(&[])?)
                .map_err(|e| e.for_path(target.as_str()))?;
        }

        if is_move {
            // Only a fully successful copy earns the source delete.
            source_lease
                .delete(&src, source_attributes.file_type.is_directory())
                .map_err(|e| e.for_path(source.as_str()))?;
        }
        Ok(())
    }
}

/// Clears the way for a copy or move target: an existing target is deleted
/// under `REPLACE_EXISTING` and rejected otherwise.
fn prepare_target(
    lease: &ChannelLease,
    dst: &str,
    target: &FsPath,
    options: &CopyOptions,
) -> Result<()> {
    match lease.read_attributes(dst, false) {
        Ok(attributes) => {
            if !options.replace_existing {
                return Err(Error::already_exists(target.as_str()));
            }
            lease
                .delete(dst, attributes.file_type.is_directory())
                .map_err(|e| e.for_path(target.as_str()))
        }
        Err(Error::NotFound { .. }) => Ok(()),
        Err(e) => Err(e.for_path(target.as_str())),
    }
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("endpoint", &self.inner.endpoint)
            .field("open", &self.is_open())
            .finish()
    }
}
