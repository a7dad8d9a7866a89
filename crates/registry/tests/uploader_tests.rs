mod common;

use common::can_bind_localhost;
use httpmock::Method::{PATCH, PUT};
use httpmock::MockServer;
use tokio::io::AsyncReadExt;
use wharf_core::{ContentHash, Credentials, Error, UploadConfig};
use wharf_registry::{RegistryUploader, UploadState, upload_file};

const MIB: usize = 1024 * 1024;

fn one_mib_config() -> UploadConfig {
    UploadConfig {
        chunk_size: MIB as u64,
        ..Default::default()
    }
}

/// Deterministic pseudo-random content, cheap to regenerate in asserts.
fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn chunked_upload_follows_the_protocol() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let data = content(3 * MIB);
    let digest = ContentHash::compute(&data).digest();

    let patches: Vec<_> = ["0-1048575", "1048576-2097151", "2097152-3145727"]
        .into_iter()
        .map(|range| {
            server.mock(move |when, then| {
                when.method(PATCH)
                    .path("/upload/1")
                    .header("content-range", range)
                    .header("content-type", "application/octet-stream")
                    .header("authorization", "Basic dTpw");
                then.status(202);
            })
        })
        .collect();
    let put = server.mock(|when, then| {
        when.method(PUT)
            .path("/upload/1")
            .query_param("digest", &digest);
        then.status(201);
    });

    let mut uploader = RegistryUploader::new(
        server.url("/upload/1"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .unwrap();

    // Feed in uneven slices; chunk boundaries come from the uploader.
    uploader.write(&data[..MIB + MIB / 2], 0).await.unwrap();
    uploader
        .write(&data[MIB + MIB / 2..], (MIB + MIB / 2) as u64)
        .await
        .unwrap();
    uploader.close().await.unwrap();

    for patch in &patches {
        assert_eq!(patch.hits(), 1);
    }
    assert_eq!(put.hits(), 1);
    assert_eq!(uploader.state(), UploadState::Finalized);
    assert_eq!(uploader.total_pushed(), 3 * MIB as u64);
    assert_eq!(uploader.digest().unwrap().digest(), digest);
}

#[tokio::test]
async fn tail_chunk_is_flushed_on_close() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let data = b"small blob";
    let digest = ContentHash::compute(data).digest();

    let patch = server.mock(|when, then| {
        when.method(PATCH)
            .path("/upload/tail")
            .header("content-range", "0-9");
        then.status(202);
    });
    let put = server.mock(|when, then| {
        when.method(PUT)
            .path("/upload/tail")
            .query_param("digest", &digest);
        then.status(201);
    });

    let mut uploader = RegistryUploader::new(
        server.url("/upload/tail"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .unwrap();
    uploader.write(data, 0).await.unwrap();
    uploader.close().await.unwrap();

    assert_eq!(patch.hits(), 1);
    assert_eq!(put.hits(), 1);
}

#[tokio::test]
async fn non_sequential_write_is_rejected() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let mut uploader = RegistryUploader::new(
        server.url("/upload/seq"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .unwrap();

    let err = uploader.write(b"abc", 5).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    // A rejected write does not kill the session.
    assert_eq!(uploader.state(), UploadState::Idle);

    uploader.write(b"abc", 0).await.unwrap();
    let err = uploader.write(b"def", 1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(uploader.total_pushed(), 3);
}

#[tokio::test]
async fn close_without_writes_is_a_noop() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let any = server.mock(|when, then| {
        when.path_contains("/upload/noop");
        then.status(500);
    });

    let mut uploader = RegistryUploader::new(
        server.url("/upload/noop"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .unwrap();
    uploader.close().await.unwrap();

    assert_eq!(any.hits(), 0);
    assert_eq!(uploader.state(), UploadState::Finalized);
    assert!(uploader.digest().is_none());

    // Terminal state: further writes reject.
    let err = uploader.write(b"late", 0).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn unauthorized_chunk_aborts_without_retry() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let patch = server.mock(|when, then| {
        when.method(PATCH).path("/upload/denied");
        then.status(401);
    });

    let mut uploader = RegistryUploader::new(
        server.url("/upload/denied"),
        Credentials::basic("u", "wrong"),
        &one_mib_config(),
    )
    .unwrap();

    let err = uploader.write(&content(MIB), 0).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    assert_eq!(patch.hits(), 1, "401 must not be retried");
    assert_eq!(uploader.state(), UploadState::Failed);

    let err = uploader.write(b"more", MIB as u64).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = uploader.close().await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn server_errors_are_retried_then_fail() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let patch = server.mock(|when, then| {
        when.method(PATCH).path("/upload/flaky");
        then.status(503);
    });

    let mut uploader = RegistryUploader::new(
        server.url("/upload/flaky"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .unwrap();

    let err = uploader.write(&content(MIB), 0).await.unwrap_err();
    assert!(matches!(err, Error::Status { status: 503, .. }));
    // The initial attempt plus three retries.
    assert_eq!(patch.hits(), 4);
    assert_eq!(uploader.state(), UploadState::Failed);
}

#[tokio::test]
async fn local_copy_mirrors_pushed_bytes() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(PATCH).path("/upload/mirror");
        then.status(202);
    });
    server.mock(|when, then| {
        when.method(PUT).path("/upload/mirror");
        then.status(201);
    });

    let dir = tempfile::tempdir().unwrap();
    let local_path = dir.path().join("mirror.blob");
    let local = tokio::fs::File::create(&local_path).await.unwrap();

    let mut uploader = RegistryUploader::new(
        server.url("/upload/mirror"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .unwrap()
    .with_local_copy(local);

    uploader.write(b"mirrored ", 0).await.unwrap();
    uploader.write(b"bytes", 9).await.unwrap();
    uploader.close().await.unwrap();

    let mut replayed = Vec::new();
    tokio::fs::File::open(&local_path)
        .await
        .unwrap()
        .read_to_end(&mut replayed)
        .await
        .unwrap();
    assert_eq!(replayed, b"mirrored bytes");
}

#[tokio::test]
async fn upload_file_streams_and_finalizes() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let data = content(2 * MIB + 512);
    let digest = ContentHash::compute(&data);

    let patch = server.mock(|when, then| {
        when.method(PATCH).path("/upload/file");
        then.status(202);
    });
    let put = server.mock(move |when, then| {
        when.method(PUT)
            .path("/upload/file")
            .query_param("digest", digest.digest());
        then.status(201);
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layer.tar");
    tokio::fs::write(&path, &data).await.unwrap();

    let pushed = upload_file(
        &path,
        &server.url("/upload/file"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .await
    .unwrap();

    assert_eq!(pushed, Some(digest));
    // Two full chunks plus the tail.
    assert_eq!(patch.hits(), 3);
    assert_eq!(put.hits(), 1);
}

#[tokio::test]
async fn session_upload_url_keeps_existing_query() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let digest = ContentHash::compute(b"q").digest();

    server.mock(|when, then| {
        when.method(PATCH).path("/upload/q");
        then.status(202);
    });
    let put = server.mock(move |when, then| {
        when.method(PUT)
            .path("/upload/q")
            .query_param("session", "s1")
            .query_param("digest", digest);
        then.status(201);
    });

    let mut uploader = RegistryUploader::new(
        server.url("/upload/q?session=s1"),
        Credentials::basic("u", "p"),
        &one_mib_config(),
    )
    .unwrap();
    uploader.write(b"q", 0).await.unwrap();
    uploader.close().await.unwrap();
    assert_eq!(put.hits(), 1);
}
