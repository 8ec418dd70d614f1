use std::collections::BTreeMap;
use std::io::{Read as _, Write as _};
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use sizecheck_artifacts::{
    catalog, ArtifactFetcher, ArtifactKind, ArtifactRecord, FetchError, FetcherConfig,
    ReleaseIndex, Target, TestType,
};

struct Server {
    base: String,
    hits: Arc<AtomicUsize>,
}

/// Serves `routes` (path -> body) until the test process exits; unknown paths
/// get a 404.
fn start_http_server(routes: BTreeMap<String, Vec<u8>>) -> Server {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                continue;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = stream.set_read_timeout(Some(Duration::from_secs(1)));

            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            for _ in 0..64 {
                match stream.read(&mut tmp) {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.extend_from_slice(&tmp[..n]);
                        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let request = String::from_utf8_lossy(&buf);
            let path = request
                .lines()
                .next()
                .and_then(|l| l.split_whitespace().nth(1))
                .unwrap_or("/")
                .to_string();

            let (status, body) = match routes.get(&path) {
                Some(body) => ("200 OK", body.clone()),
                None => ("404 Not Found", b"missing".to_vec()),
            };
            let head = format!(
                "HTTP/1.1 {status}\r\n\
Content-Type: application/octet-stream\r\n\
Content-Length: {}\r\n\
Connection: close\r\n\
\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
        }
    });

    Server {
        base: format!("http://{addr}"),
        hits,
    }
}

fn tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *data)
            .expect("append tar member");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default();
    for (name, data) in members {
        w.start_file(*name, opts).expect("start zip member");
        w.write_all(data).expect("write zip member");
    }
    w.finish().expect("finish zip").into_inner()
}

fn fetcher(bins: &Path) -> ArtifactFetcher {
    ArtifactFetcher::new(FetcherConfig {
        bins_dir: bins.to_path_buf(),
        force_refresh: false,
        auth_token: None,
    })
}

#[test]
fn tar_member_is_extracted_once_and_then_reused() {
    let server = start_http_server(BTreeMap::from([(
        "/demo.tar.gz".to_string(),
        tar_gz(&[("pkg/README", b"readme"), ("pkg/bin/demo", b"\x7fELF demo")]),
    )]));
    let row = [
        "demo".to_string(),
        format!("{}/demo.tar.gz", server.base),
        "3".to_string(),
        "tar".to_string(),
        "demo:demo".to_string(),
    ];
    let records = catalog::parse(&[row]).expect("parse catalog");
    let record = &records[0];
    assert_eq!(record.test_types, TestType::Text | TestType::Json);

    let tmp = tempfile::tempdir().expect("tempdir");
    let f = fetcher(tmp.path());

    f.ensure_exist(record).expect("first fetch");
    assert_eq!(
        std::fs::read(tmp.path().join("demo")).expect("read target"),
        b"\x7fELF demo"
    );
    assert_eq!(f.request_count(), 1);
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);

    f.ensure_exist(record).expect("second fetch");
    assert_eq!(f.request_count(), 1, "second call must not hit the network");
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[test]
fn force_refresh_downloads_again() {
    let server = start_http_server(BTreeMap::from([(
        "/raw".to_string(),
        b"v2".to_vec(),
    )]));
    let tmp = tempfile::tempdir().expect("tempdir");
    std::fs::write(tmp.path().join("raw-bin"), b"v1").expect("seed");

    let record = ArtifactRecord {
        name: "raw".to_string(),
        url: format!("{}/raw", server.base),
        test_types: TestType::Text.into(),
        kind: ArtifactKind::Raw,
        targets: vec![Target::raw("raw-bin")],
    };
    let f = ArtifactFetcher::new(FetcherConfig {
        bins_dir: tmp.path().to_path_buf(),
        force_refresh: true,
        auth_token: None,
    });
    f.ensure_exist(&record).expect("refresh");
    assert_eq!(std::fs::read(tmp.path().join("raw-bin")).expect("read"), b"v2");
    assert_eq!(f.request_count(), 1);
}

#[test]
fn partial_presence_triggers_full_refetch() {
    let server = start_http_server(BTreeMap::from([(
        "/pair.zip".to_string(),
        zip_bytes(&[("out/a.exe", b"AAA"), ("out/b.exe", b"BBB")]),
    )]));
    let tmp = tempfile::tempdir().expect("tempdir");
    std::fs::write(tmp.path().join("a"), b"stale").expect("seed");

    let record = ArtifactRecord {
        name: "pair".to_string(),
        url: format!("{}/pair.zip", server.base),
        test_types: TestType::Json | TestType::Svg,
        kind: ArtifactKind::Zip,
        targets: vec![Target::member("a.exe", "a"), Target::member("b.exe", "b")],
    };
    let f = fetcher(tmp.path());
    assert!(!f.is_present(&record));
    f.ensure_exist(&record).expect("fetch zip");

    assert_eq!(std::fs::read(tmp.path().join("a")).expect("a"), b"AAA");
    assert_eq!(std::fs::read(tmp.path().join("b")).expect("b"), b"BBB");
    assert_eq!(f.request_count(), 1);
}

#[test]
fn missing_member_writes_nothing() {
    let server = start_http_server(BTreeMap::from([
        (
            "/partial.tar.gz".to_string(),
            tar_gz(&[("x/present", b"here")]),
        ),
        (
            "/partial.zip".to_string(),
            zip_bytes(&[("x/present", b"here")]),
        ),
    ]));

    for (kind, path) in [
        (ArtifactKind::Tar, "/partial.tar.gz"),
        (ArtifactKind::Zip, "/partial.zip"),
    ] {
        let tmp = tempfile::tempdir().expect("tempdir");
        let record = ArtifactRecord {
            name: "partial".to_string(),
            url: format!("{}{path}", server.base),
            test_types: TestType::Text.into(),
            kind,
            targets: vec![
                Target::member("present", "sub/present"),
                Target::member("absent", "sub/absent"),
            ],
        };
        let err = fetcher(tmp.path()).ensure_exist(&record).unwrap_err();
        match err {
            FetchError::ArchiveMemberNotFound(member) => assert_eq!(member, "absent"),
            other => panic!("unexpected error for {kind}: {other}"),
        }
        assert!(!tmp.path().join("sub/present").exists(), "{kind}");
        assert!(!tmp.path().join("sub/absent").exists(), "{kind}");
    }
}

#[test]
fn http_errors_surface_as_download_errors() {
    let server = start_http_server(BTreeMap::new());
    let tmp = tempfile::tempdir().expect("tempdir");
    let record = ArtifactRecord {
        name: "gone".to_string(),
        url: format!("{}/gone", server.base),
        test_types: TestType::Text.into(),
        kind: ArtifactKind::Raw,
        targets: vec![Target::raw("gone")],
    };
    let err = fetcher(tmp.path()).ensure_exist(&record).unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, FetchError::Download { .. }), "err={msg}");
    assert!(msg.contains("HTTP 404"), "err={msg}");
    assert!(!tmp.path().join("gone").exists());
}

#[test]
fn ensure_all_fetches_independent_artifacts() {
    let mut routes = BTreeMap::new();
    let mut records = Vec::new();
    for i in 0..6 {
        routes.insert(format!("/bin{i}"), format!("payload-{i}").into_bytes());
    }
    let server = start_http_server(routes);
    for i in 0..6 {
        records.push(ArtifactRecord {
            name: format!("bin{i}"),
            url: format!("{}/bin{i}", server.base),
            test_types: TestType::Text.into(),
            kind: ArtifactKind::Raw,
            targets: vec![Target::raw(format!("bin{i}"))],
        });
    }
    let tmp = tempfile::tempdir().expect("tempdir");
    let f = fetcher(tmp.path());
    f.ensure_all(&records, 3).expect("fetch all");
    for i in 0..6 {
        let got = std::fs::read(tmp.path().join(format!("bin{i}"))).expect("read");
        assert_eq!(got, format!("payload-{i}").into_bytes());
    }
    assert_eq!(f.request_count(), 6);
}

#[test]
fn release_index_fetches_metadata_once() {
    let metadata = br#"{"assets":[
        {"name":"bin-linux","browser_download_url":"https://example/bin-linux"},
        {"name":"bin-darwin","browser_download_url":"https://example/bin-darwin"}
    ]}"#;
    let server = start_http_server(BTreeMap::from([(
        "/release".to_string(),
        metadata.to_vec(),
    )]));
    let tmp = tempfile::tempdir().expect("tempdir");
    let f = fetcher(tmp.path());
    let index = ReleaseIndex::new(format!("{}/release", server.base));

    assert_eq!(
        index.asset_url(&f, "bin-linux").expect("lookup").as_deref(),
        Some("https://example/bin-linux")
    );
    assert_eq!(
        index.asset_url(&f, "bin-darwin").expect("lookup").as_deref(),
        Some("https://example/bin-darwin")
    );
    assert_eq!(index.asset_url(&f, "bin-windows").expect("lookup"), None);
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}
