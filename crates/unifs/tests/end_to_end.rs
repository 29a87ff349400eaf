//! End-to-end scenarios against the in-memory backends: an object-store
//! filesystem for the `s3` scheme and a POSIX filesystem for `sftp`.

use std::io::{Read, Write};
use std::time::Duration;

use unifs::env::keys;
use unifs::pool::PoolConfig;
use unifs::url::Url;
use unifs::{
    AccessMode, AttributeValue, CopyOption, Error, FileSystem, FileSystemEnvironment,
    FileSystemProvider, OpenOption, PosixPermissions,
};
use unifs_memfs::{MemoryObjectBackend, MemoryPosixBackend, MemoryPosixFs};

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn small_pool() -> PoolConfig {
    PoolConfig::builder().initial_size(0).max_size(4).build()
}

fn object_provider() -> FileSystemProvider<MemoryObjectBackend> {
    FileSystemProvider::new(MemoryObjectBackend::new())
}

fn object_fs(
    provider: &FileSystemProvider<MemoryObjectBackend>,
    endpoint: &str,
    bucket: &str,
) -> FileSystem {
    let env = FileSystemEnvironment::new()
        .with(keys::BUCKET, bucket)
        .with(keys::POOL_CONFIG, small_pool());
    provider.new_file_system(&url(endpoint), &env).unwrap()
}

fn posix_provider(working_dir: &str) -> FileSystemProvider<MemoryPosixBackend> {
    FileSystemProvider::new(MemoryPosixBackend::new(MemoryPosixFs::new(working_dir)))
}

fn posix_fs(provider: &FileSystemProvider<MemoryPosixBackend>, endpoint: &str) -> FileSystem {
    let env = FileSystemEnvironment::new()
        .with(keys::USERNAME, "alice")
        .with(keys::PASSWORD, "secret")
        .with(keys::POOL_CONFIG, small_pool());
    provider.new_file_system(&url(endpoint), &env).unwrap()
}

fn write_file(fs: &FileSystem, path: &str, body: &[u8]) {
    let path = fs.path(path).unwrap();
    let mut stream = fs.new_output_stream(&path, &[]).unwrap();
    stream.write_all(body).unwrap();
    stream.close().unwrap();
}

fn read_file(fs: &FileSystem, path: &str) -> Vec<u8> {
    let path = fs.path(path).unwrap();
    let mut stream = fs.new_input_stream(&path, &[]).unwrap();
    let mut body = Vec::new();
    stream.read_to_end(&mut body).unwrap();
    body
}

#[test_log::test]
fn object_store_round_trip() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");

    write_file(&fs, "/d/f", b"hello");
    assert_eq!(read_file(&fs, "/d/f"), b"hello");

    let path = fs.path("/d/f").unwrap();
    fs.delete(&path).unwrap();
    assert!(!fs.exists(&path).unwrap());
}

#[test_log::test]
fn directory_listing_filters_synthetic_entries() {
    let provider = posix_provider("/");
    let fs = posix_fs(&provider, "sftp://files.test");

    fs.create_directory(&fs.path("/a").unwrap()).unwrap();
    write_file(&fs, "/a/x", b"1");
    write_file(&fs, "/a/y", b"2");

    let stream = fs
        .new_directory_stream(&fs.path("/a").unwrap(), None)
        .unwrap();
    let mut names: Vec<String> = stream
        .iter()
        .unwrap()
        .map(|p| p.file_name().unwrap().as_str().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["x", "y"], "dot entries must not leak through");
}

#[test_log::test]
fn directory_stream_is_single_use_and_closable() {
    let provider = posix_provider("/");
    let fs = posix_fs(&provider, "sftp://files.test");
    fs.create_directory(&fs.path("/a").unwrap()).unwrap();
    write_file(&fs, "/a/x", b"1");
    write_file(&fs, "/a/skip-me", b"2");

    let dir = fs.path("/a").unwrap();
    let stream = fs
        .new_directory_stream(
            &dir,
            Some(Box::new(|p| {
                p.file_name().is_some_and(|n| !n.as_str().starts_with("skip"))
            })),
        )
        .unwrap();
    let accepted: Vec<_> = stream.iter().unwrap().collect();
    assert_eq!(accepted.len(), 1);
    assert!(matches!(stream.iter(), Err(Error::InvalidArgument { .. })));

    let stream = fs.new_directory_stream(&dir, None).unwrap();
    stream.close();
    assert!(matches!(stream.iter(), Err(Error::InvalidArgument { .. })));
}

#[test_log::test]
fn mixed_read_write_channel_is_rejected_before_any_remote_call() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    let store = provider.backend().bucket("a");

    let result = fs.new_byte_channel(
        &fs.path("/f").unwrap(),
        &[OpenOption::Read, OpenOption::Write],
    );
    assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    assert_eq!(store.created_channels(), 0, "no channel was even minted");
}

#[test_log::test]
fn byte_channel_round_trip() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    let path = fs.path("/f").unwrap();

    let mut writer = fs
        .new_byte_channel(&path, &[OpenOption::Write, OpenOption::Create])
        .unwrap();
    assert!(writer.is_write_only());
    writer.write_all(b"bytes").unwrap();
    writer.close().unwrap();

    let mut reader = fs.new_byte_channel(&path, &[]).unwrap();
    assert!(reader.is_read_only());
    let mut body = String::new();
    reader.read_to_string(&mut body).unwrap();
    assert_eq!(body, "bytes");
}

#[test_log::test]
fn cross_file_system_move() {
    let provider = object_provider();
    let fs1 = object_fs(&provider, "s3://one.test", "b1");
    let fs2 = object_fs(&provider, "s3://two.test", "b2");

    write_file(&fs1, "/src", b"payload");
    let src = fs1.path("/src").unwrap();
    let dst = fs2.path("/dst").unwrap();

    fs1.move_to(&src, &dst, &[]).unwrap();
    assert_eq!(read_file(&fs2, "/dst"), b"payload");
    assert!(!fs1.exists(&src).unwrap());
}

#[test_log::test]
fn failed_cross_file_system_move_keeps_the_source() {
    let provider = object_provider();
    let fs1 = object_fs(&provider, "s3://one.test", "b1");
    let fs2 = object_fs(&provider, "s3://two.test", "b2");

    write_file(&fs1, "/src", b"payload");
    provider.backend().bucket("b2").fail_next_store();

    let src = fs1.path("/src").unwrap();
    let dst = fs2.path("/dst").unwrap();
    assert!(fs1.move_to(&src, &dst, &[]).is_err());
    assert!(fs1.exists(&src).unwrap(), "source survives a failed copy half");
    assert!(!fs2.exists(&dst).unwrap());
}

#[test_log::test]
fn cross_file_system_copy_rejects_symbolic_links() {
    let posix = posix_provider("/");
    let sftp = posix_fs(&posix, "sftp://files.test");
    posix.backend().fs().seed_file("/target", b"data");
    posix.backend().fs().seed_symlink("/link", "target");

    let s3 = object_provider();
    let objects = object_fs(&s3, "s3://storage.test", "a");

    let result = sftp.copy(
        &sftp.path("/link").unwrap(),
        &objects.path("/link-copy").unwrap(),
        &[],
    );
    assert!(matches!(result, Err(Error::UnsupportedOperation { .. })));
}

#[test_log::test]
fn copy_within_one_file_system_works_on_a_pool_of_one() {
    let provider = object_provider();
    let env = FileSystemEnvironment::new()
        .with(keys::BUCKET, "a")
        .with(
            keys::POOL_CONFIG,
            PoolConfig::builder().initial_size(0).max_size(1).build(),
        );
    let fs = provider
        .new_file_system(&url("s3://storage.test"), &env)
        .unwrap();

    write_file(&fs, "/src", b"payload");
    fs.copy(&fs.path("/src").unwrap(), &fs.path("/dst").unwrap(), &[])
        .unwrap();
    assert_eq!(read_file(&fs, "/dst"), b"payload");
    assert_eq!(read_file(&fs, "/src"), b"payload");
}

#[test_log::test]
fn copy_respects_replace_existing() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    write_file(&fs, "/src", b"new");
    write_file(&fs, "/dst", b"old");

    let src = fs.path("/src").unwrap();
    let dst = fs.path("/dst").unwrap();
    assert!(matches!(
        fs.copy(&src, &dst, &[]),
        Err(Error::AlreadyExists { .. })
    ));
    fs.copy(&src, &dst, &[CopyOption::ReplaceExisting]).unwrap();
    assert_eq!(read_file(&fs, "/dst"), b"new");
}

#[test_log::test]
fn move_within_one_file_system_renames_a_directory_tree() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    fs.create_directory(&fs.path("/d").unwrap()).unwrap();
    write_file(&fs, "/d/f", b"1");

    fs.move_to(&fs.path("/d").unwrap(), &fs.path("/e").unwrap(), &[])
        .unwrap();
    assert!(fs.exists(&fs.path("/e/f").unwrap()).unwrap());
    assert!(!fs.exists(&fs.path("/d").unwrap()).unwrap());
}

#[test_log::test]
fn attribute_projection_is_exact() {
    let provider = posix_provider("/");
    let fs = posix_fs(&provider, "sftp://files.test");
    write_file(&fs, "/f", &[7u8; 42]);

    let projected = fs
        .read_attributes_map(&fs.path("/f").unwrap(), "posix:size,isDirectory", true)
        .unwrap();
    assert_eq!(projected.len(), 2);
    assert_eq!(projected["size"], AttributeValue::Size(42));
    assert_eq!(projected["isDirectory"], AttributeValue::Bool(false));
}

#[test_log::test]
fn owner_and_group_set_through_distinct_operations() {
    let provider = posix_provider("/");
    let fs = posix_fs(&provider, "sftp://files.test");
    write_file(&fs, "/f", b"x");
    let path = fs.path("/f").unwrap();

    fs.set_attribute(
        &path,
        "posix:owner",
        AttributeValue::Principal(Some("alice".to_string())),
    )
    .unwrap();
    fs.set_attribute(
        &path,
        "posix:group",
        AttributeValue::Principal(Some("staff".to_string())),
    )
    .unwrap();

    let attributes = fs.read_attributes(&path, true).unwrap();
    assert_eq!(attributes.owner.as_deref(), Some("alice"));
    assert_eq!(attributes.group.as_deref(), Some("staff"));
}

#[test_log::test]
fn permissions_govern_check_access() {
    let provider = posix_provider("/");
    let fs = posix_fs(&provider, "sftp://files.test");
    write_file(&fs, "/f", b"x");
    let path = fs.path("/f").unwrap();

    fs.check_access(&path, &[AccessMode::Read, AccessMode::Write])
        .unwrap();
    assert!(matches!(
        fs.check_access(&path, &[AccessMode::Execute]),
        Err(Error::AccessDenied { .. })
    ));

    fs.set_permissions(&path, PosixPermissions::from_mode(0o000))
        .unwrap();
    assert!(matches!(
        fs.check_access(&path, &[AccessMode::Read]),
        Err(Error::AccessDenied { .. })
    ));

    // Existence check alone still passes.
    fs.check_access(&path, &[]).unwrap();
}

#[test_log::test]
fn real_path_resolves_symbolic_links() {
    let provider = posix_provider("/");
    let fs = posix_fs(&provider, "sftp://files.test");
    provider.backend().fs().seed_file("/target", b"data");
    provider.backend().fs().seed_symlink("/link", "target");

    let real = fs.path("/link").unwrap().to_real_path(true).unwrap();
    assert_eq!(real.as_str(), "/target");

    let unfollowed = fs.path("/link").unwrap().to_real_path(false).unwrap();
    assert_eq!(unfollowed.as_str(), "/link");

    assert_eq!(
        fs.read_symbolic_link(&fs.path("/link").unwrap())
            .unwrap()
            .as_str(),
        "target"
    );
}

#[test_log::test]
fn relative_paths_resolve_against_the_working_directory() {
    let provider = posix_provider("/home/alice");
    let fs = posix_fs(&provider, "sftp://files.test");

    write_file(&fs, "report.txt", b"quarterly");
    assert_eq!(read_file(&fs, "/home/alice/report.txt"), b"quarterly");
    assert_eq!(
        fs.path("report.txt").unwrap().to_absolute_path().as_str(),
        "/home/alice/report.txt"
    );
}

#[test_log::test]
fn delete_on_close_removes_the_file() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    write_file(&fs, "/tmp-file", b"scratch");
    let path = fs.path("/tmp-file").unwrap();

    let mut stream = fs
        .new_input_stream(&path, &[OpenOption::Read, OpenOption::DeleteOnClose])
        .unwrap();
    let mut body = Vec::new();
    stream.read_to_end(&mut body).unwrap();
    assert_eq!(body, b"scratch");
    stream.close().unwrap();

    assert!(!fs.exists(&path).unwrap());
}

#[test_log::test]
#[serial_test::serial]
fn open_stream_defers_channel_reuse_until_close() {
    let provider = object_provider();
    let env = FileSystemEnvironment::new()
        .with(keys::BUCKET, "a")
        .with(
            keys::POOL_CONFIG,
            PoolConfig::builder()
                .initial_size(0)
                .max_size(1)
                .max_wait_time(Some(Duration::from_millis(50)))
                .build(),
        );
    let fs = provider
        .new_file_system(&url("s3://storage.test"), &env)
        .unwrap();
    write_file(&fs, "/f", b"body");
    let path = fs.path("/f").unwrap();

    let stream = fs.new_input_stream(&path, &[]).unwrap();
    // The stream leases the only channel; an unrelated operation times out.
    assert!(matches!(fs.exists(&path), Err(Error::Timeout)));

    stream.close().unwrap();
    assert!(fs.exists(&path).unwrap());
}

#[test_log::test]
fn keep_alive_probes_idle_channels() {
    let provider = posix_provider("/");
    let fs = posix_fs(&provider, "sftp://files.test");
    // Leave one channel in the idle queue.
    write_file(&fs, "/f", b"x");

    fs.keep_alive().unwrap();
    assert_eq!(provider.backend().fs().keep_alive_probes(), 1);
}

#[test_log::test]
fn paths_of_a_different_file_system_are_rejected() {
    let provider = object_provider();
    let fs1 = object_fs(&provider, "s3://one.test", "b1");
    let fs2 = object_fs(&provider, "s3://two.test", "b2");

    let foreign = fs2.path("/f").unwrap();
    assert!(matches!(fs1.delete(&foreign), Err(Error::ProviderMismatch)));
    assert!(matches!(
        fs1.new_input_stream(&foreign, &[]),
        Err(Error::ProviderMismatch)
    ));
}

#[test_log::test]
fn output_options_are_rejected_on_input_streams() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    let path = fs.path("/f").unwrap();
    assert!(matches!(
        fs.new_input_stream(&path, &[OpenOption::Write]),
        Err(Error::UnsupportedOption { .. })
    ));
}

#[test_log::test]
fn closed_file_system_rejects_operations() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    write_file(&fs, "/f", b"x");
    let path = fs.path("/f").unwrap();

    fs.close().unwrap();
    assert!(!fs.is_open());
    assert!(matches!(fs.exists(&path), Err(Error::PoolShutdown)));
}

#[test_log::test]
fn stale_channels_are_replaced_transparently() {
    let provider = object_provider();
    let fs = object_fs(&provider, "s3://storage.test", "a");
    let store = provider.backend().bucket("a");

    write_file(&fs, "/f", b"x");
    let before = store.created_channels();
    store.invalidate_channels();

    // The stale idle channel is discarded and a fresh one minted.
    assert!(fs.exists(&fs.path("/f").unwrap()).unwrap());
    assert!(store.created_channels() > before);
}

#[test_log::test]
fn channel_creation_failure_surfaces_and_recovers() {
    let provider = object_provider();
    let env = FileSystemEnvironment::new()
        .with(keys::BUCKET, "a")
        .with(
            keys::POOL_CONFIG,
            PoolConfig::builder().initial_size(0).max_size(1).build(),
        );
    let fs = provider
        .new_file_system(&url("s3://storage.test"), &env)
        .unwrap();
    let store = provider.backend().bucket("a");

    store.fail_next_create();
    let path = fs.path("/f").unwrap();
    assert!(matches!(fs.exists(&path), Err(Error::Io { .. })));

    // The reserved slot was given back; the next operation succeeds.
    assert!(!fs.exists(&path).unwrap());
}
