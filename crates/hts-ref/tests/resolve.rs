use hts_ref::{
    ContentSource, HandleKind, Md5Checksum, RefConfig, RefError, ReferenceResolver, Transport,
    DEFAULT_REF_PATH, PATH_SEPARATOR,
};
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const REMOTE: &str = "http://refs.invalid/md5/%s";

#[derive(Default)]
struct FakeTransport {
    responses: HashMap<String, Vec<u8>>,
    broken: Vec<String>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeTransport {
    fn serving(url: String, body: &[u8]) -> Self {
        let mut responses = HashMap::new();
        responses.insert(url, body.to_vec());
        Self {
            responses,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct BrokenStream;

impl Read for BrokenStream {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
    }
}

impl Transport for FakeTransport {
    fn open(&self, url: &str) -> hts_ref::Result<Box<dyn Read + Send>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.broken.iter().any(|broken| broken == url) {
            return Ok(Box::new(BrokenStream));
        }
        match self.responses.get(url) {
            Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
            None => Err(RefError::Transport {
                message: format!("server returned status 404 for {url}"),
            }),
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("hts.ref=debug")
        .try_init();
}

/// Formatted log output shared with a scoped subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn remote_url(md5: &Md5Checksum) -> String {
    REMOTE.replace("%s", md5.as_str())
}

fn config(ref_path: &str, cache_root: Option<&Path>) -> RefConfig {
    RefConfig {
        ref_path: Some(ref_path.to_string()),
        ref_cache: cache_root.map(|root| format!("{}/%2s/%2s/%s", root.display())),
        ..RefConfig::default()
    }
}

fn resolver_for<'a>(
    ref_path: &str,
    cache_root: Option<&Path>,
    transport: &'a FakeTransport,
) -> ReferenceResolver<&'a FakeTransport> {
    ReferenceResolver::with_transport(&config(ref_path, cache_root), transport)
}

fn cached_path(cache_root: &Path, md5: &Md5Checksum) -> PathBuf {
    let s = md5.as_str();
    cache_root.join(&s[..2]).join(&s[2..4]).join(&s[4..])
}

fn read_all(mut reader: impl Read) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[test]
fn fetch_populates_cache_and_second_resolve_is_served_from_it() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let content = b">chr1\nACGTACGTACGTNNNN\n".to_vec();
    let md5 = Md5Checksum::of_bytes(&content);

    let transport = FakeTransport::serving(remote_url(&md5), &content);
    let resolver = resolver_for(REMOTE, Some(&cache_root), &transport);

    let first = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(first.kind(), HandleKind::InMemoryBuffer);
    assert_eq!(first.source(), &ContentSource::Remote(remote_url(&md5)));
    assert_eq!(first.size(), content.len() as u64);
    let first_bytes = read_all(first);
    assert_eq!(first_bytes, content);
    assert_eq!(transport.calls(), 1);

    let entry = cached_path(&cache_root, &md5);
    assert_eq!(resolver.cache_path(&md5), Some(entry.clone()));
    assert_eq!(
        Md5Checksum::of_reader(std::fs::File::open(&entry).unwrap()).unwrap(),
        md5
    );
    assert!(std::fs::metadata(&entry).unwrap().permissions().readonly());

    let second = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(second.kind(), HandleKind::CacheFile);
    assert_eq!(second.source(), &ContentSource::Cache(entry.clone()));
    assert_eq!(read_all(second), first_bytes);
    assert_eq!(transport.calls(), 1, "cache hit must not touch the transport");

    assert_eq!(files_under(&cache_root), vec![entry]);
}

#[test]
fn corrupted_download_is_rejected_and_not_cached() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let md5 = Md5Checksum::of_bytes(b"the real reference");

    let transport = FakeTransport::serving(remote_url(&md5), b"something else entirely");
    let resolver = resolver_for(REMOTE, Some(&cache_root), &transport);

    let err = resolver.resolve(md5.as_str()).unwrap_err();
    assert!(err.is_integrity_mismatch(), "{err}");
    assert!(!cached_path(&cache_root, &md5).exists());
    assert!(files_under(&cache_root).is_empty());
}

#[test]
fn existing_cache_entry_bypasses_search_path_entirely() {
    struct PanickingTransport;
    impl Transport for PanickingTransport {
        fn open(&self, url: &str) -> hts_ref::Result<Box<dyn Read + Send>> {
            panic!("transport must not be used on a cache hit: {url}");
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let md5 = Md5Checksum::of_bytes(b"cached");
    let entry = cached_path(&cache_root, &md5);
    std::fs::create_dir_all(entry.parent().unwrap()).unwrap();
    std::fs::write(&entry, b"cached").unwrap();

    let resolver =
        ReferenceResolver::with_transport(&config(REMOTE, Some(&cache_root)), PanickingTransport);
    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(handle.kind(), HandleKind::CacheFile);
    assert_eq!(read_all(handle), b"cached");
}

#[test]
fn cache_hits_are_trusted_without_verification() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let md5 = Md5Checksum::of_bytes(b"original");
    let entry = cached_path(&cache_root, &md5);
    std::fs::create_dir_all(entry.parent().unwrap()).unwrap();
    std::fs::write(&entry, b"tampered").unwrap();

    let transport = FakeTransport::default();
    let resolver = resolver_for(REMOTE, Some(&cache_root), &transport);
    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(read_all(handle), b"tampered");
    assert_eq!(transport.calls(), 0);
}

#[test]
fn local_search_path_hit_avoids_network_and_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let refs = tmp.path().join("refs");
    let cache_root = tmp.path().join("cache");
    std::fs::create_dir_all(&refs).unwrap();
    let content = b"ACGT".to_vec();
    let md5 = Md5Checksum::of_bytes(&content);
    std::fs::write(refs.join(md5.as_str()), &content).unwrap();

    let ref_path = format!("{REMOTE}{PATH_SEPARATOR}{}", refs.display());
    let transport = FakeTransport::serving(remote_url(&md5), &content);
    let resolver = resolver_for(&ref_path, Some(&cache_root), &transport);

    assert_eq!(
        resolver.find_local(md5.as_str()).unwrap(),
        Some(refs.join(md5.as_str()))
    );

    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(handle.kind(), HandleKind::CacheFile);
    assert_eq!(
        handle.source(),
        &ContentSource::SearchPath {
            path: refs.join(md5.as_str()),
            compressed_suffix: None,
        }
    );
    assert_eq!(read_all(handle), content);
    assert_eq!(transport.calls(), 0);
    assert!(!cached_path(&cache_root, &md5).exists());
}

#[test]
fn unknown_checksum_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let md5 = Md5Checksum::of_bytes(b"nobody has this");

    let ref_path = format!("{REMOTE}{PATH_SEPARATOR}ftp://mirror.invalid/%s");
    let transport = FakeTransport::default();
    let resolver = resolver_for(&ref_path, Some(&cache_root), &transport);

    let err = resolver.resolve(md5.as_str()).unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert_eq!(transport.calls(), 2);
    assert_eq!(resolver.find_local(md5.as_str()).unwrap(), None);
    assert!(files_under(&cache_root).is_empty());
}

#[test]
fn failing_entries_fall_through_to_later_ones() {
    let content = b"NNNNACGT".to_vec();
    let md5 = Md5Checksum::of_bytes(&content);
    let broken = format!("http://broken.invalid/{md5}");
    let good = format!("http://good.invalid/{md5}");

    let mut transport = FakeTransport::serving(good, &content);
    transport.broken.push(broken);
    let ref_path = [
        "http://missing.invalid/%s",
        "http://broken.invalid/%s",
        "http://good.invalid/%s",
    ]
    .join(&PATH_SEPARATOR.to_string());

    let resolver = resolver_for(&ref_path, None, &transport);
    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(
        handle.source(),
        &ContentSource::Remote(format!("http://good.invalid/{md5}"))
    );
    assert_eq!(read_all(handle), content);
    assert_eq!(transport.calls(), 3);
}

#[test]
fn cache_write_failure_still_returns_verified_content() {
    let tmp = tempfile::tempdir().unwrap();
    // A regular file where a cache directory would have to be created.
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();

    let content = b"ACGTTGCA".to_vec();
    let md5 = Md5Checksum::of_bytes(&content);
    let transport = FakeTransport::serving(remote_url(&md5), &content);
    let resolver = resolver_for(REMOTE, Some(&blocker), &transport);

    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(read_all(handle), content);
    assert!(std::fs::metadata(&blocker).unwrap().is_file());
}

#[test]
fn invalid_checksum_is_rejected_before_any_lookup() {
    let transport = FakeTransport::default();
    let resolver = resolver_for(REMOTE, None, &transport);
    for bad in ["", "xyz", "ac37ec46683600f808cdd41eac1d55c", "../../etc/passwd"] {
        let err = resolver.resolve(bad).unwrap_err();
        assert!(matches!(err, RefError::InvalidChecksum { .. }), "{err}");
    }
    assert_eq!(transport.calls(), 0);
}

#[test]
fn uppercase_checksum_resolves_to_lowercase_cache_entry() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let content = b"acgt".to_vec();
    let md5 = Md5Checksum::of_bytes(&content);

    let transport = FakeTransport::serving(remote_url(&md5), &content);
    let resolver = resolver_for(REMOTE, Some(&cache_root), &transport);
    let handle = resolver.resolve(&md5.as_str().to_ascii_uppercase()).unwrap();
    assert_eq!(read_all(handle), content);
    assert!(cached_path(&cache_root, &md5).is_file());
}

#[test]
fn large_payloads_are_returned_as_remote_streams() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let content: Vec<u8> = b"ACGT".iter().copied().cycle().take(64 * 1024).collect();
    let md5 = Md5Checksum::of_bytes(&content);

    let transport = FakeTransport::serving(remote_url(&md5), &content);
    let mut config = config(REMOTE, Some(&cache_root));
    config.memory_limit_bytes = 1024;
    let resolver = ReferenceResolver::with_transport(&config, &transport);

    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(handle.kind(), HandleKind::RemoteStream);
    assert_eq!(handle.size(), content.len() as u64);
    assert_eq!(read_all(handle), content);
    assert_eq!(
        std::fs::read(cached_path(&cache_root, &md5)).unwrap(),
        content
    );
}

#[test]
fn concurrent_uncoordinated_resolves_both_succeed() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let content = b"GATTACA".repeat(1000);
    let md5 = Md5Checksum::of_bytes(&content);

    let mut transport = FakeTransport::serving(remote_url(&md5), &content);
    transport.delay = Some(Duration::from_millis(20));
    let resolver = resolver_for(REMOTE, Some(&cache_root), &transport);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| read_all(resolver.resolve(md5.as_str()).unwrap())))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), content);
        }
    });

    assert_eq!(files_under(&cache_root), vec![cached_path(&cache_root, &md5)]);
}

#[test]
fn exclusive_resolves_fetch_once() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let content = b"CCCCGGGG".repeat(100);
    let md5 = Md5Checksum::of_bytes(&content);

    let mut transport = FakeTransport::serving(remote_url(&md5), &content);
    transport.delay = Some(Duration::from_millis(20));
    let resolver = resolver_for(REMOTE, Some(&cache_root), &transport);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| scope.spawn(|| read_all(resolver.resolve_exclusive(md5.as_str()).unwrap())))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), content);
        }
    });

    assert_eq!(transport.calls(), 1);
}

#[cfg(unix)]
#[test]
fn unopenable_local_file_falls_through_to_later_entries() {
    use std::os::unix::fs::PermissionsExt;

    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    std::fs::create_dir_all(&first).unwrap();
    std::fs::create_dir_all(&second).unwrap();
    let content = b"GATTACA".to_vec();
    let md5 = Md5Checksum::of_bytes(&content);

    let locked = first.join(md5.as_str());
    std::fs::write(&locked, &content).unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    if std::fs::File::open(&locked).is_ok() {
        // Permission bits are not enforced for this user (e.g. root).
        return;
    }
    std::fs::write(second.join(md5.as_str()), &content).unwrap();

    let transport = FakeTransport::serving(remote_url(&md5), &content);
    let sep = PATH_SEPARATOR.to_string();
    let ref_path = [
        first.display().to_string(),
        second.display().to_string(),
        REMOTE.to_string(),
    ]
    .join(&sep);
    let resolver = resolver_for(&ref_path, None, &transport);

    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(
        handle.source(),
        &ContentSource::SearchPath {
            path: second.join(md5.as_str()),
            compressed_suffix: None,
        }
    );
    assert_eq!(read_all(handle), content);
    assert_eq!(transport.calls(), 0);

    // With no readable local copy the remote entry serves it.
    let ref_path = [first.display().to_string(), REMOTE.to_string()].join(&sep);
    let resolver = resolver_for(&ref_path, None, &transport);
    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(handle.source(), &ContentSource::Remote(remote_url(&md5)));
    assert_eq!(read_all(handle), content);
    assert_eq!(transport.calls(), 1);
}

#[test]
fn spool_failure_fails_the_resolve_instead_of_trying_other_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let content = b"ACGT".repeat(1024);
    let md5 = Md5Checksum::of_bytes(&content);
    let mirror = format!("http://mirror.invalid/{md5}");

    let mut transport = FakeTransport::serving(remote_url(&md5), &content);
    transport.responses.insert(mirror, content.clone());
    let ref_path = format!("{REMOTE}{PATH_SEPARATOR}http://mirror.invalid/%s");
    let mut config = config(&ref_path, None);
    config.memory_limit_bytes = 64;
    config.spool_dir = Some(tmp.path().join("missing"));
    let resolver = ReferenceResolver::with_transport(&config, &transport);

    let err = resolver.resolve(md5.as_str()).unwrap_err();
    assert!(matches!(err, RefError::Spool { .. }), "{err}");
    assert_eq!(transport.calls(), 1);

    // The same payload spools fine once the directory exists.
    std::fs::create_dir_all(tmp.path().join("missing")).unwrap();
    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(handle.kind(), HandleKind::RemoteStream);
    assert_eq!(read_all(handle), content);
}

#[test]
fn failed_cache_rename_leaves_no_temp_file_and_still_returns_content() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let content = b"TTTTAAAACCCCGGGG".to_vec();
    let md5 = Md5Checksum::of_bytes(&content);

    // A non-empty directory sits where the cache file would be published.
    let entry = cached_path(&cache_root, &md5);
    std::fs::create_dir_all(&entry).unwrap();
    std::fs::write(entry.join("keep"), b"").unwrap();

    let transport = FakeTransport::serving(remote_url(&md5), &content);
    let resolver = resolver_for(REMOTE, Some(&cache_root), &transport);
    let handle = resolver.resolve(md5.as_str()).unwrap();
    assert_eq!(handle.kind(), HandleKind::InMemoryBuffer);
    assert_eq!(read_all(handle), content);

    assert!(entry.is_dir());
    let leftovers: Vec<_> = files_under(&cache_root)
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(".tmp_"))
        })
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn creating_the_default_cache_warns_once() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("base");
    let first = b"ACGTACGT".to_vec();
    let second = b"TGCATGCA".to_vec();
    let first_md5 = Md5Checksum::of_bytes(&first);
    let second_md5 = Md5Checksum::of_bytes(&second);

    let mut transport = FakeTransport::default();
    for (md5, body) in [(&first_md5, &first), (&second_md5, &second)] {
        transport
            .responses
            .insert(DEFAULT_REF_PATH.replace("%s", md5.as_str()), body.clone());
    }
    let config = RefConfig {
        cache_base: Some(base.clone()),
        ..RefConfig::default()
    };
    let resolver = ReferenceResolver::with_transport(&config, &transport);

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let handle = resolver.resolve(first_md5.as_str()).unwrap();
        assert_eq!(read_all(handle), first);
        let output = logs.contents();
        assert!(output.contains("creating reference cache directory"), "{output}");
        assert!(output.contains(&base.join("hts-ref").display().to_string()), "{output}");

        logs.clear();
        let handle = resolver.resolve(second_md5.as_str()).unwrap();
        assert_eq!(read_all(handle), second);
        let output = logs.contents();
        assert!(!output.contains("creating reference cache directory"), "{output}");
    });

    assert!(base.join("hts-ref").is_dir());
}
