//! Backend adapters binding the in-memory stores to the provider layer.

use std::collections::HashMap;

use parking_lot::Mutex;

use unifs::env::keys;
use unifs::uri::Endpoint;
use unifs::{Backend, ChannelFactory, Error, FileSystemEnvironment, Result, Scheme};

use crate::object::MemoryObjectStore;
use crate::posix::MemoryPosixFs;

/// An object-store backend serving the `s3` scheme family. Buckets are
/// independent key spaces created on demand, like buckets on a real
/// endpoint.
#[derive(Default)]
pub struct MemoryObjectBackend {
    buckets: Mutex<HashMap<String, MemoryObjectStore>>,
}

impl MemoryObjectBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind a bucket, created if needed. Lets tests seed and
    /// inspect objects directly.
    pub fn bucket(&self, name: &str) -> MemoryObjectStore {
        self.buckets
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl Backend for MemoryObjectBackend {
    fn scheme(&self) -> Scheme {
        Scheme::S3
    }

    fn channel_factory(
        &self,
        endpoint: &Endpoint,
        _env: &FileSystemEnvironment,
    ) -> Result<Box<dyn ChannelFactory>> {
        let bucket = endpoint
            .bucket()
            .ok_or_else(|| Error::invalid_property(keys::BUCKET))?;
        Ok(Box::new(self.bucket(bucket).channel_factory()))
    }
}

/// A POSIX backend serving the `sftp` scheme over one in-memory
/// filesystem. Sessions require a username and either a password or
/// identity files, as a real server would.
pub struct MemoryPosixBackend {
    fs: MemoryPosixFs,
}

impl MemoryPosixBackend {
    pub fn new(fs: MemoryPosixFs) -> Self {
        MemoryPosixBackend { fs }
    }

    pub fn fs(&self) -> &MemoryPosixFs {
        &self.fs
    }
}

impl Backend for MemoryPosixBackend {
    fn scheme(&self) -> Scheme {
        Scheme::Sftp
    }

    fn channel_factory(
        &self,
        _endpoint: &Endpoint,
        env: &FileSystemEnvironment,
    ) -> Result<Box<dyn ChannelFactory>> {
        env.require_string(keys::USERNAME)?;
        let has_password = env.string(keys::PASSWORD)?.is_some();
        let has_identities = env.string_list(keys::IDENTITIES)?.is_some();
        if !has_password && !has_identities {
            return Err(Error::invalid_property(keys::PASSWORD));
        }
        Ok(Box::new(self.fs.channel_factory()))
    }

    fn default_directory(
        &self,
        _endpoint: &Endpoint,
        env: &FileSystemEnvironment,
    ) -> Result<String> {
        match env.string(keys::DEFAULT_DIR)? {
            Some(dir) => Ok(dir.to_string()),
            None => Ok(self.fs.working_dir().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(uri: &str, scheme: Scheme) -> Endpoint {
        unifs::uri::endpoint_for_lookup(&unifs::url::Url::parse(uri).unwrap(), scheme).unwrap()
    }

    #[test]
    fn object_backend_requires_a_bucket() {
        let backend = MemoryObjectBackend::new();
        let env = FileSystemEnvironment::new();
        assert!(matches!(
            backend.channel_factory(&endpoint("s3://host.example", Scheme::S3), &env),
            Err(Error::InvalidProperty { .. })
        ));
        assert!(
            backend
                .channel_factory(&endpoint("s3://host.example#media", Scheme::S3), &env)
                .is_ok()
        );
    }

    #[test]
    fn buckets_are_independent() {
        let backend = MemoryObjectBackend::new();
        backend.bucket("a").put_object("k", b"1");
        assert!(backend.bucket("a").has_object("k"));
        assert!(!backend.bucket("b").has_object("k"));
    }

    #[test]
    fn posix_backend_requires_credentials() {
        let backend = MemoryPosixBackend::new(MemoryPosixFs::new("/home/alice"));
        let endpoint = endpoint("sftp://host.example", Scheme::Sftp);

        let no_user = FileSystemEnvironment::new();
        assert!(backend.channel_factory(&endpoint, &no_user).is_err());

        let no_secret = FileSystemEnvironment::new().with(keys::USERNAME, "alice");
        assert!(backend.channel_factory(&endpoint, &no_secret).is_err());

        let with_password = FileSystemEnvironment::new()
            .with(keys::USERNAME, "alice")
            .with(keys::PASSWORD, "secret");
        assert!(backend.channel_factory(&endpoint, &with_password).is_ok());

        let with_identities = FileSystemEnvironment::new()
            .with(keys::USERNAME, "alice")
            .with(keys::IDENTITIES, vec!["~/.ssh/id_ed25519".to_string()]);
        assert!(backend.channel_factory(&endpoint, &with_identities).is_ok());
    }

    #[test]
    fn posix_default_directory_prefers_the_environment() {
        let backend = MemoryPosixBackend::new(MemoryPosixFs::new("/home/alice"));
        let endpoint = endpoint("sftp://host.example", Scheme::Sftp);
        let env = FileSystemEnvironment::new();
        assert_eq!(
            backend.default_directory(&endpoint, &env).unwrap(),
            "/home/alice"
        );
        let env = env.with(keys::DEFAULT_DIR, "/srv/data");
        assert_eq!(
            backend.default_directory(&endpoint, &env).unwrap(),
            "/srv/data"
        );
    }
}
