//! The node binary driven as the remote end of an ssh transport.

mod common;

use ballast_storage::standin::encode_standin;
use ballast_storage::{CacheHierarchy, ContentHash};
use ballast_store::transport::{SshTransport, WireTransport};
use ballast_store::{BigFileStore, FetchRequest, Probe, PutOutcome, StoreError, WireStore};
use ballast_types::testing::MemoryHistory;
use ballast_types::Progress;
use common::{read, Client};
use std::path::Path;
use std::sync::Arc;

fn node_transport(served: &Path) -> Arc<dyn WireTransport> {
    let args = vec![
        "stdio".to_string(),
        "--cache-dir".to_string(),
        served.join("cache").display().to_string(),
        "--system-cache".to_string(),
        served.join("system").display().to_string(),
        "--log-level".to_string(),
        "warn".to_string(),
    ];
    Arc::new(SshTransport::with_command(
        "ssh://node.test/srv/ballast",
        env!("CARGO_BIN_EXE_ballast-node"),
        args,
    ))
}

async fn open(served: &Path, client: &Client) -> BigFileStore {
    match WireStore::probe(node_transport(served)).await.unwrap() {
        Probe::Capable(backend) => BigFileStore::new(Arc::from(backend), client.cache.clone()),
        Probe::NotCapable { reason } => panic!("node not capable: {}", reason),
    }
}

#[tokio::test]
async fn test_stdio_session_put_get_verify() {
    let served = tempfile::tempdir().unwrap();
    let client = Client::new();
    let store = open(served.path(), &client).await;

    let (path, hash) = client.write("data/set.csv", b"a,b,c\n1,2,3\n");
    assert_eq!(
        store.put("data/set.csv", &path, &hash).await.unwrap(),
        PutOutcome::Uploaded
    );
    assert_eq!(
        store.put("data/set.csv", &path, &hash).await.unwrap(),
        PutOutcome::AlreadyPresent
    );

    let node_cache = CacheHierarchy::new(
        served.path().join("cache"),
        served.path().join("system"),
    );
    assert!(node_cache.in_cache(&hash));

    let absent = ContentHash::compute(b"not there");
    let requests = vec![
        FetchRequest {
            file: "data/set.csv".to_string(),
            dest: client.path("clone/data/set.csv"),
            hash,
        },
        FetchRequest {
            file: "gone.bin".to_string(),
            dest: client.path("clone/gone.bin"),
            hash: absent,
        },
    ];
    let outcome = store.get(&requests, &Progress::silent()).await.unwrap();
    assert_eq!(outcome.success, vec!["data/set.csv".to_string()]);
    assert_eq!(outcome.missing, vec!["gone.bin".to_string()]);
    assert_eq!(read(&client.path("clone/data/set.csv")), b"a,b,c\n1,2,3\n");

    let history = MemoryHistory::new();
    let rev = history.commit(
        &[],
        &[
            (".bfs/data/set.csv", encode_standin(&hash).as_slice()),
            (".bfs/gone.bin", encode_standin(&absent).as_slice()),
        ],
    );
    let report = store
        .verify(&history, &[rev.clone()], true, &Progress::silent())
        .await
        .unwrap();
    let messages: Vec<String> = report.failures.iter().map(|f| f.to_string()).collect();
    assert_eq!(messages, vec![format!("changeset {}: gone.bin missing", rev.short())]);
}

#[tokio::test]
async fn test_stdio_rejects_wrong_content() {
    let served = tempfile::tempdir().unwrap();
    let client = Client::new();
    let store = open(served.path(), &client).await;

    let (path, _) = client.write("a.bin", b"actual bytes");
    let claimed = ContentHash::compute(b"claimed bytes");
    let err = store.put("a.bin", &path, &claimed).await.unwrap_err();
    assert!(matches!(err, StoreError::Transfer(_)), "{:?}", err);

    // The session survives a rejected upload.
    let (path, hash) = client.write("b.bin", b"fine");
    assert_eq!(
        store.put("b.bin", &path, &hash).await.unwrap(),
        PutOutcome::Uploaded
    );
}
