//! Client and node talking over a real HTTP listener.

mod common;

use ballast_proto::StatStatus;
use ballast_storage::standin::encode_standin;
use ballast_storage::ContentHash;
use ballast_store::{
    BackendKind, BigFileStore, Direction, FetchRequest, HttpApiStore, Probe, PutOutcome,
    StoreBackend, StoreError,
};
use ballast_types::testing::MemoryHistory;
use ballast_types::Progress;
use common::{read, Client, Node};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_node_is_opened_as_wire_store() {
    let node = Node::start().await;
    let client = Client::new();

    let store = client.open(&node.url).await;
    assert_eq!(store.kind(), BackendKind::Wire);
}

#[tokio::test]
async fn test_http_api_accepts_node() {
    let node = Node::start().await;

    match HttpApiStore::probe(&node.url, reqwest::Client::new()).await.unwrap() {
        Probe::Capable(backend) => assert_eq!(backend.kind(), BackendKind::HttpApi),
        Probe::NotCapable { reason } => panic!("node declined: {reason}"),
    }
}

#[tokio::test]
async fn test_http_api_declines_plain_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, axum::Router::new()).await.unwrap();
    });

    let probe = HttpApiStore::probe(&url, reqwest::Client::new()).await.unwrap();
    assert!(matches!(probe, Probe::NotCapable { .. }));
}

#[tokio::test]
async fn test_put_is_idempotent() {
    let node = Node::start().await;
    let client = Client::new();
    let store = client.open(&node.url).await;
    let (path, hash) = client.write("assets/model.bin", b"weights and biases");

    let first = store.put("assets/model.bin", &path, &hash).await.unwrap();
    let second = store.put("assets/model.bin", &path, &hash).await.unwrap();

    assert_eq!(first, PutOutcome::Uploaded);
    assert_eq!(second, PutOutcome::AlreadyPresent);
    assert_eq!(node.state.stats.snapshot().uploads, 1);
    assert!(node.cache().in_system_cache(&hash));
}

#[tokio::test]
async fn test_upload_with_wrong_content_is_rejected() {
    let node = Node::start().await;
    let client = Client::new();
    let store = client.open(&node.url).await;
    let (path, _) = client.write("a.bin", b"what is on disk");
    let claimed = ContentHash::compute(b"what the standin says");

    let err = store.put("a.bin", &path, &claimed).await.unwrap_err();
    assert!(matches!(err, StoreError::Transfer(_)), "{:?}", err);
    assert!(node.cache().find_content(&claimed).is_none());
}

#[tokio::test]
async fn test_get_isolates_missing_files() {
    let node = Node::start().await;
    let client = Client::new();
    let present = node.seed(b"present content");
    let absent = ContentHash::compute(b"never uploaded");
    let store = client.open(&node.url).await;

    let requests = vec![
        FetchRequest {
            file: "absent.bin".to_string(),
            dest: client.path("absent.bin"),
            hash: absent,
        },
        FetchRequest {
            file: "present.bin".to_string(),
            dest: client.path("present.bin"),
            hash: present,
        },
    ];
    let outcome = store.get(&requests, &Progress::silent()).await.unwrap();

    assert_eq!(outcome.success, vec!["present.bin".to_string()]);
    assert_eq!(outcome.missing, vec!["absent.bin".to_string()]);
    assert_eq!(read(&client.path("present.bin")), b"present content");
    assert!(!client.path("absent.bin").exists());
    assert!(client.cache.in_cache(&present));
    assert!(client.cache.in_system_cache(&present));
}

#[tokio::test]
async fn test_get_refuses_corrupt_server_content() {
    let node = Node::start().await;
    let client = Client::new();
    let hash = node.corrupt(b"the real thing");
    let store = client.open(&node.url).await;

    let request = FetchRequest {
        file: "rotten.bin".to_string(),
        dest: client.path("rotten.bin"),
        hash,
    };
    let outcome = store.get(&[request], &Progress::silent()).await.unwrap();

    assert_eq!(outcome.missing, vec!["rotten.bin".to_string()]);
    assert!(!client.path("rotten.bin").exists());
    assert!(!client.cache.in_cache(&hash));
}

#[tokio::test]
async fn test_http_api_store_round_trip() {
    let node = Node::start().await;
    let client = Client::new();
    let backend = HttpApiStore::new(node.url.clone(), reqwest::Client::new());
    let store = BigFileStore::new(Arc::new(backend), client.cache.clone());
    let (path, hash) = client.write("video.mp4", b"frames");

    assert_eq!(
        store.put("video.mp4", &path, &hash).await.unwrap(),
        PutOutcome::Uploaded
    );
    assert!(store.exists(&hash).await.unwrap());

    let request = FetchRequest {
        file: "video.mp4".to_string(),
        dest: client.path("copy/video.mp4"),
        hash,
    };
    let outcome = store.get(&[request], &Progress::silent()).await.unwrap();
    assert_eq!(outcome.success.len(), 1);
    assert_eq!(read(&client.path("copy/video.mp4")), b"frames");
}

#[tokio::test]
async fn test_verify_detects_corruption_through_both_backends() {
    let node = Node::start().await;
    let client = Client::new();
    let good = node.seed(b"good");
    let bad = node.corrupt(b"original");

    let history = MemoryHistory::new();
    let rev = history.commit(
        &[],
        &[
            (".bfs/good.bin", encode_standin(&good).as_slice()),
            (".bfs/bad.bin", encode_standin(&bad).as_slice()),
        ],
    );
    let expected = vec![format!("changeset {}: bad.bin: contents differ", rev.short())];

    let wire = client.open(&node.url).await;
    let api = BigFileStore::new(
        Arc::new(HttpApiStore::new(node.url.clone(), reqwest::Client::new())),
        client.cache.clone(),
    );
    for store in [wire, api] {
        let report = store
            .verify(&history, &[rev.clone()], true, &Progress::silent())
            .await
            .unwrap();
        let messages: Vec<String> = report.failures.iter().map(|f| f.to_string()).collect();
        assert_eq!(messages, expected, "{:?}", store.kind());
    }
}

#[tokio::test]
async fn test_remote_check_rehashes_on_server() {
    let node = Node::start().await;
    let good = node.seed(b"intact");
    let bad = node.corrupt(b"original");
    let missing = ContentHash::compute(b"never stored");
    let backend = HttpApiStore::new(node.url.clone(), reqwest::Client::new());

    for contents in [false, true] {
        assert_eq!(backend.check(&good, contents).await.unwrap(), StatStatus::Ok);
        assert_eq!(backend.check(&bad, contents).await.unwrap(), StatStatus::Mismatch);
        assert_eq!(backend.check(&missing, contents).await.unwrap(), StatStatus::Missing);
    }
    assert_eq!(node.state.stats.snapshot().downloads, 0);
}

#[tokio::test]
async fn test_unreachable_node_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = Client::new();
    let err = client
        .opener(&url)
        .open(None, Direction::Pull)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unreachable { .. }), "{:?}", err);
}
