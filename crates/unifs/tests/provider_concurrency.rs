//! Concurrency of filesystem registration through the provider front door:
//! lookups of an endpoint being created block until creation settles, and
//! unrelated endpoints never wait on each other.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;

use parking_lot::Mutex;
use unifs::env::keys;
use unifs::pool::PoolConfig;
use unifs::uri::Endpoint;
use unifs::url::Url;
use unifs::{
    Backend, Channel, ChannelFactory, Error, FileSystemEnvironment, FileSystemProvider, Result,
    Scheme,
};

/// A backend whose factory construction can be stalled from the test, to
/// hold a registration in its pending phase.
struct GatedBackend {
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl GatedBackend {
    fn new() -> Self {
        GatedBackend {
            gate: Mutex::new(None),
        }
    }

    /// Arms the gate: the next creation signals `started` and then blocks
    /// until `release` fires.
    fn arm(&self) -> (Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel();
        *self.gate.lock() = Some((started_tx, release_rx));
        (started_rx, release_tx)
    }
}

struct IdleFactory;

impl ChannelFactory for IdleFactory {
    fn create_channel(&self) -> Result<Box<dyn Channel>> {
        Err(Error::unsupported("channels in registration tests"))
    }
}

impl Backend for GatedBackend {
    fn scheme(&self) -> Scheme {
        Scheme::Sftp
    }

    fn channel_factory(
        &self,
        _endpoint: &Endpoint,
        env: &FileSystemEnvironment,
    ) -> Result<Box<dyn ChannelFactory>> {
        env.require_string(keys::USERNAME)?;
        if let Some((started, release)) = self.gate.lock().take() {
            started.send(()).expect("test is waiting on the gate");
            release.recv().expect("test releases the gate");
        }
        Ok(Box::new(IdleFactory))
    }
}

fn env() -> FileSystemEnvironment {
    FileSystemEnvironment::new()
        .with(keys::USERNAME, "alice")
        .with(
            keys::POOL_CONFIG,
            PoolConfig::builder().initial_size(0).max_size(1).build(),
        )
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[test_log::test]
fn lookup_blocks_until_creation_completes() {
    let provider = Arc::new(FileSystemProvider::new(GatedBackend::new()));
    let (started, release) = provider.backend().arm();

    let creator = {
        let provider = provider.clone();
        std::thread::spawn(move || provider.new_file_system(&url("sftp://slow.test"), &env()))
    };
    started.recv().unwrap();

    let getter = {
        let provider = provider.clone();
        std::thread::spawn(move || provider.get_file_system(&url("sftp://slow.test")))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert!(!getter.is_finished(), "lookup must wait for the creation");

    release.send(()).unwrap();
    let created = creator.join().unwrap().unwrap();
    let found = getter.join().unwrap().unwrap();
    assert_eq!(created.endpoint(), found.endpoint());
}

#[test_log::test]
fn unrelated_endpoints_do_not_serialize() {
    let provider = Arc::new(FileSystemProvider::new(GatedBackend::new()));
    let (started, release) = provider.backend().arm();

    let creator = {
        let provider = provider.clone();
        std::thread::spawn(move || provider.new_file_system(&url("sftp://slow.test"), &env()))
    };
    started.recv().unwrap();

    // While slow.test is mid-creation, an unrelated endpoint registers and
    // resolves freely.
    let fast = provider
        .new_file_system(&url("sftp://fast.test"), &env())
        .unwrap();
    assert_eq!(fast.endpoint(), "sftp://fast.test");
    provider.get_file_system(&url("sftp://fast.test")).unwrap();

    release.send(()).unwrap();
    creator.join().unwrap().unwrap();
    assert_eq!(provider.uris().len(), 2);
}

#[test_log::test]
fn close_waits_for_a_pending_creation_then_removes_it() {
    let provider = Arc::new(FileSystemProvider::new(GatedBackend::new()));
    let (started, release) = provider.backend().arm();

    let creator = {
        let provider = provider.clone();
        std::thread::spawn(move || provider.new_file_system(&url("sftp://slow.test"), &env()))
    };
    started.recv().unwrap();

    let closer = {
        let provider = provider.clone();
        std::thread::spawn(move || provider.close_file_system(&url("sftp://slow.test")))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert!(!closer.is_finished(), "close must wait for the creation");

    release.send(()).unwrap();
    let created = creator.join().unwrap().unwrap();
    closer.join().unwrap().unwrap();
    assert!(!created.is_open(), "the closed filesystem was shut down");
    assert!(matches!(
        provider.get_file_system(&url("sftp://slow.test")),
        Err(Error::FileSystemNotFound { .. })
    ));
}

#[test_log::test]
fn failed_creation_leaves_no_registration_behind() {
    let provider = FileSystemProvider::new(GatedBackend::new());

    // No username: the factory rejects the environment.
    let bad_env = FileSystemEnvironment::new();
    assert!(matches!(
        provider.new_file_system(&url("sftp://slow.test"), &bad_env),
        Err(Error::InvalidProperty { .. })
    ));
    assert!(matches!(
        provider.get_file_system(&url("sftp://slow.test")),
        Err(Error::FileSystemNotFound { .. })
    ));

    // The endpoint is free for a second attempt.
    provider
        .new_file_system(&url("sftp://slow.test"), &env())
        .unwrap();
}
