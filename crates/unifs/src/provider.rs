//! The provider front door: one registry of live filesystems per backend.
//!
//! A provider binds a scheme and a backend to a registry. Filesystems are
//! created from a URI plus an environment, looked up by normalized
//! endpoint, and all closed when the provider itself closes.

use url::Url;

use crate::channel::ChannelFactory;
use crate::env::{FileSystemEnvironment, keys};
use crate::fs::FileSystem;
use crate::path::FsPath;
use crate::registry::Registry;
use crate::uri::{Endpoint, Scheme, endpoint_for_creation, endpoint_for_lookup, endpoint_for_path};
use crate::{Error, Result};

/// A backend: everything scheme-specific a provider needs.
pub trait Backend: Send + Sync + 'static {
    /// The scheme this backend serves.
    fn scheme(&self) -> Scheme;

    /// Builds the channel factory for one filesystem instance, validating
    /// the environment. Called outside the registry's global lock.
    fn channel_factory(
        &self,
        endpoint: &Endpoint,
        env: &FileSystemEnvironment,
    ) -> Result<Box<dyn ChannelFactory>>;

    /// The directory relative paths resolve against. Defaults to the
    /// `defaultDir` environment entry, else the root.
    fn default_directory(
        &self,
        endpoint: &Endpoint,
        env: &FileSystemEnvironment,
    ) -> Result<String> {
        let _ = endpoint;
        Ok(env.string(keys::DEFAULT_DIR)?.unwrap_or("/").to_string())
    }
}

/// The registry and lifecycle of one backend's filesystems.
pub struct FileSystemProvider<B: Backend> {
    backend: B,
    registry: Registry<FileSystem>,
}

impl<B: Backend> FileSystemProvider<B> {
    pub fn new(backend: B) -> Self {
        FileSystemProvider {
            backend,
            registry: Registry::new(),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.backend.scheme()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates and registers a filesystem for `uri`.
    ///
    /// The URI must be a bare endpoint (no path, query or user info); the
    /// bucket comes from the fragment or the `bucket` environment entry.
    /// A concurrent lookup of the same endpoint blocks until creation
    /// settles; creation of distinct endpoints proceeds concurrently.
    pub fn new_file_system(
        &self,
        uri: &Url,
        env: &FileSystemEnvironment,
    ) -> Result<FileSystem> {
        let mut endpoint = endpoint_for_creation(uri, self.scheme())?;
        if endpoint.bucket().is_none() {
            if let Some(bucket) = env.string(keys::BUCKET)? {
                endpoint = endpoint.with_bucket(Some(bucket.to_string()));
            }
        }
        let key = endpoint.registry_key();
        self.registry.add(&key, || {
            let factory = self.backend.channel_factory(&endpoint, env)?;
            let default_dir = self.backend.default_directory(&endpoint, env)?;
            FileSystem::create(
                self.scheme(),
                key.clone(),
                &default_dir,
                factory,
                env.pool_config()?,
            )
        })
    }

    /// Looks up the filesystem registered for `uri`'s endpoint.
    pub fn get_file_system(&self, uri: &Url) -> Result<FileSystem> {
        let endpoint = endpoint_for_lookup(uri, self.scheme())?;
        self.registry.get(&endpoint.registry_key())
    }

    /// Resolves a URI with a path against its registered filesystem.
    pub fn get_path(&self, uri: &Url) -> Result<FsPath> {
        let endpoint = endpoint_for_path(uri, self.scheme())?;
        let fs = self.registry.get(&endpoint.registry_key())?;
        fs.path(uri.path())
    }

    /// Unregisters and closes the filesystem for `uri`. Waits out an
    /// in-flight creation of the same endpoint.
    pub fn close_file_system(&self, uri: &Url) -> Result<()> {
        let endpoint = endpoint_for_lookup(uri, self.scheme())?;
        match self.registry.remove(&endpoint.registry_key())? {
            Some(fs) => fs.close(),
            None => Ok(()),
        }
    }

    /// Snapshot of the registered endpoint keys.
    pub fn uris(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Closes the provider: drains the registry and closes every
    /// registered filesystem. The first close failure is returned, later
    /// ones are logged.
    pub fn close(&self) -> Result<()> {
        let mut first_error = None;
        for key in self.registry.keys() {
            let removed = match self.registry.remove(&key) {
                Ok(removed) => removed,
                // Raced with another close; already gone.
                Err(Error::FileSystemNotFound { .. }) => None,
                Err(e) => {
                    record_error(&mut first_error, e);
                    continue;
                }
            };
            if let Some(fs) = removed {
                if let Err(e) = fs.close() {
                    record_error(&mut first_error, e);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

fn record_error(first_error: &mut Option<Error>, e: Error) {
    if first_error.is_none() {
        *first_error = Some(e);
    } else {
        log::warn!("additional failure while closing provider: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use unifs_pool::PoolConfig;

    struct NullChannel;

    impl Channel for NullChannel {
        fn store_file(
            &self,
            _path: &str,
            _source: &mut dyn std::io::Read,
            _options: &crate::OpenOptions,
        ) -> Result<()> {
            Err(Error::unsupported("store"))
        }

        fn new_input_stream(
            &self,
            _path: &str,
            _options: &crate::OpenOptions,
        ) -> Result<Box<dyn std::io::Read + Send>> {
            Err(Error::unsupported("read"))
        }

        fn new_output_stream(
            &self,
            _path: &str,
            _options: &crate::OpenOptions,
        ) -> Result<Box<dyn std::io::Write + Send>> {
            Err(Error::unsupported("write"))
        }

        fn rename(&self, _source: &str, _target: &str) -> Result<()> {
            Err(Error::unsupported("rename"))
        }

        fn mkdir(&self, _path: &str) -> Result<()> {
            Err(Error::unsupported("mkdir"))
        }

        fn delete(&self, _path: &str, _is_directory: bool) -> Result<()> {
            Err(Error::unsupported("delete"))
        }

        fn list_files(&self, _path: &str) -> Result<Vec<crate::FileEntry>> {
            Err(Error::unsupported("list"))
        }

        fn read_attributes(
            &self,
            path: &str,
            _follow_links: bool,
        ) -> Result<crate::PosixFileAttributes> {
            Err(Error::not_found(path))
        }
    }

    struct NullFactory;

    impl ChannelFactory for NullFactory {
        fn create_channel(&self) -> Result<Box<dyn Channel>> {
            Ok(Box::new(NullChannel))
        }
    }

    struct NullBackend {
        scheme: Scheme,
    }

    impl Backend for NullBackend {
        fn scheme(&self) -> Scheme {
            self.scheme
        }

        fn channel_factory(
            &self,
            _endpoint: &Endpoint,
            env: &FileSystemEnvironment,
        ) -> Result<Box<dyn ChannelFactory>> {
            // A username is this backend's one required property.
            env.require_string(keys::USERNAME)?;
            Ok(Box::new(NullFactory))
        }
    }

    fn provider(scheme: Scheme) -> FileSystemProvider<NullBackend> {
        FileSystemProvider::new(NullBackend { scheme })
    }

    fn env() -> FileSystemEnvironment {
        FileSystemEnvironment::new()
            .with(keys::USERNAME, "alice")
            .with(
                keys::POOL_CONFIG,
                PoolConfig::builder().initial_size(0).max_size(2).build(),
            )
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn create_get_close_round_trip() {
        let provider = provider(Scheme::Sftp);
        let uri = url("sftp://files.example.com");
        let fs = provider.new_file_system(&uri, &env()).unwrap();
        assert!(fs.is_open());
        assert_eq!(fs.endpoint(), "sftp://files.example.com");

        let found = provider.get_file_system(&uri).unwrap();
        assert!(found.same_instance(&fs));

        provider.close_file_system(&uri).unwrap();
        assert!(!fs.is_open());
        assert!(matches!(
            provider.get_file_system(&uri),
            Err(Error::FileSystemNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_creation_is_rejected() {
        let provider = provider(Scheme::Sftp);
        let uri = url("sftp://files.example.com");
        provider.new_file_system(&uri, &env()).unwrap();
        assert!(matches!(
            provider.new_file_system(&uri, &env()),
            Err(Error::FileSystemAlreadyExists { .. })
        ));
    }

    #[test]
    fn missing_required_property_fails_creation_and_frees_the_key() {
        let provider = provider(Scheme::Sftp);
        let uri = url("sftp://files.example.com");
        let empty = FileSystemEnvironment::new();
        assert!(matches!(
            provider.new_file_system(&uri, &empty),
            Err(Error::InvalidProperty { .. })
        ));
        // The failed registration left no entry behind.
        provider.new_file_system(&uri, &env()).unwrap();
    }

    #[test]
    fn bucket_distinguishes_object_store_file_systems() {
        let provider = provider(Scheme::S3);
        let uri = url("s3://storage.example.com");
        let media = provider
            .new_file_system(&uri, &env().with(keys::BUCKET, "media"))
            .unwrap();
        let backup = provider
            .new_file_system(&uri, &env().with(keys::BUCKET, "backup"))
            .unwrap();
        assert!(!media.same_instance(&backup));
        assert_eq!(provider.uris().len(), 2);

        // The fragment selects the bucket on lookup.
        let found = provider
            .get_file_system(&url("s3://storage.example.com#backup"))
            .unwrap();
        assert!(found.same_instance(&backup));
    }

    #[test]
    fn get_path_requires_a_path_and_resolves_it() {
        let provider = provider(Scheme::S3);
        provider
            .new_file_system(&url("s3://storage.example.com"), &env())
            .unwrap();

        let path = provider
            .get_path(&url("s3://storage.example.com/data/x"))
            .unwrap();
        assert_eq!(path.as_str(), "/data/x");

        assert!(matches!(
            provider.get_path(&url("s3://storage.example.com")),
            Err(Error::InvalidUri { .. })
        ));
    }

    #[test]
    fn scheme_aliases_reach_the_same_file_system() {
        let provider = provider(Scheme::S3);
        let fs = provider
            .new_file_system(&url("oss://storage.example.com"), &env())
            .unwrap();
        let found = provider
            .get_file_system(&url("s3a://storage.example.com"))
            .unwrap();
        assert!(found.same_instance(&fs));
    }

    #[test]
    fn provider_close_closes_every_file_system() {
        let provider = provider(Scheme::S3);
        let a = provider
            .new_file_system(&url("s3://a.example.com"), &env())
            .unwrap();
        let b = provider
            .new_file_system(&url("s3://b.example.com"), &env())
            .unwrap();
        provider.close().unwrap();
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert!(provider.uris().is_empty());
    }
}
