//! HTTP API for the Ballast node.
//!
//! Two surfaces share one [`WireHandler`]:
//!
//! - wire commands on the root URL: `GET /?cmd=capabilities`,
//!   `GET /?cmd=statbfile&sha=<hash>`, `GET /?cmd=getbfile&sha=<hash>`, and
//!   `POST /?cmd=putbfile&sha=<hash>` with the content as body
//! - the file API: `GET`, `HEAD`, and `PUT` on `/bfile/<hash>`
//!
//! `getbfile` answers with a length line followed by the raw bytes. A `HEAD`
//! carrying `SHA1-Request` re-hashes the stored content and reports the
//! result in `Content-SHA1`. Every `/bfile` answer advertises the store
//! capability in a `bfile-store` header.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ballast_proto::{
    length_line, ProtoError, PushStatus, WireCommand, WireHandler, CONTENT_SHA1_HEADER,
    SHA1_REQUEST_HEADER, SHA_ARG, STORE_CAPABILITY, STORE_HEADER,
};
use ballast_storage::ContentHash;
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::{
    limit::RequestBodyLimitLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Serves content out of the node's cache hierarchy.
    pub handler: WireHandler,
    /// Transfer counters.
    pub stats: Arc<TransferStats>,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Creates state around `handler` with the default upload limit.
    pub fn new(handler: WireHandler) -> Self {
        Self {
            handler,
            stats: Arc::new(TransferStats::default()),
            max_upload_bytes: usize::try_from(DEFAULT_MAX_UPLOAD_BYTES).unwrap_or(usize::MAX),
        }
    }

    /// Sets the upload limit.
    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// Counts completed transfers since the node started.
#[derive(Debug, Default)]
pub struct TransferStats {
    uploads: AtomicU64,
    downloads: AtomicU64,
    stats: AtomicU64,
}

/// A point-in-time copy of [`TransferStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounts {
    /// Uploads that were verified and stored.
    pub uploads: u64,
    /// Downloads started.
    pub downloads: u64,
    /// Status checks answered.
    pub stats: u64,
}

impl TransferStats {
    /// Returns the current counts.
    pub fn snapshot(&self) -> TransferCounts {
        TransferCounts {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            stats: self.stats.load(Ordering::Relaxed),
        }
    }

    fn record_upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_stat(&self) {
        self.stats.fetch_add(1, Ordering::Relaxed);
    }
}

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An upload did not hash to the address it was sent to.
    #[error("content does not match {0}")]
    HashMismatch(ContentHash),

    /// An upload body ran past the configured limit.
    #[error("upload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Wire handler failure.
    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::HashMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Proto(ProtoError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Proto(
                ProtoError::UnknownCommand(_)
                | ProtoError::MissingArgument { .. }
                | ProtoError::Protocol(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Proto(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Query string of a wire command.
#[derive(Debug, Deserialize)]
pub struct WireQuery {
    cmd: Option<String>,
    sha: Option<String>,
}

impl WireQuery {
    fn command(&self) -> Result<WireCommand, ApiError> {
        let cmd = self
            .cmd
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("missing 'cmd' parameter".to_string()))?;
        Ok(cmd.parse()?)
    }

    fn hash(&self, command: WireCommand) -> Result<ContentHash, ApiError> {
        let sha = self.sha.as_deref().ok_or_else(|| ProtoError::MissingArgument {
            command: command.to_string(),
            name: SHA_ARG.to_string(),
        })?;
        parse_hash(sha)
    }
}

fn parse_hash(hex: &str) -> Result<ContentHash, ApiError> {
    ContentHash::from_hex(hex).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;
    let bfile = Router::new()
        .route(
            "/bfile/{hash}",
            get(get_bfile).head(head_bfile).put(put_bfile),
        )
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(STORE_HEADER),
            HeaderValue::from_static(STORE_CAPABILITY),
        ));
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(wire_get).post(wire_post))
        .merge(bfile)
        .layer(RequestBodyLimitLayer::new(upload_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "transfers": state.stats.snapshot(),
    }))
}

fn text(body: String) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )],
        body,
    )
        .into_response()
}

fn octets(len: u64, body: Body) -> Response {
    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        body,
    )
        .into_response()
}

/// Returns true if `err` or one of its sources is a body length limit error.
fn is_length_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Streams an upload body into the handler.
///
/// A body without `Content-Length` is only cut off by the limit layer once
/// it runs past the limit; that surfaces here as a read error.
async fn receive(
    state: &AppState,
    hash: &ContentHash,
    body: Body,
) -> Result<PushStatus, ApiError> {
    let too_large = AtomicBool::new(false);
    let stream = body.into_data_stream().map_err(|e| {
        if is_length_limit(&e) {
            too_large.store(true, Ordering::Relaxed);
        }
        std::io::Error::other(e)
    });
    let mut reader = StreamReader::new(stream);
    let result = state.handler.put_file(hash, &mut reader).await;
    drop(reader);
    if too_large.load(Ordering::Relaxed) {
        warn!(hash = %hash, limit = state.max_upload_bytes, "upload body over limit");
        return Err(ApiError::PayloadTooLarge(state.max_upload_bytes));
    }
    let status = result?;
    if status == PushStatus::Success {
        state.stats.record_upload();
    }
    Ok(status)
}

/// Wire queries and downloads.
async fn wire_get(
    State(state): State<AppState>,
    Query(query): Query<WireQuery>,
) -> Result<Response, ApiError> {
    let command = query.command()?;
    match command {
        WireCommand::Capabilities => Ok(text(state.handler.capabilities().to_string())),
        WireCommand::StatFile => {
            let hash = query.hash(command)?;
            let status = state.handler.stat_file(&hash).await?;
            state.stats.record_stat();
            Ok(text(status.encode()))
        }
        WireCommand::GetFile => {
            let hash = query.hash(command)?;
            let (len, file) = state.handler.open_file(&hash).await?;
            state.stats.record_download();
            let prefix = length_line(len);
            let total = prefix.len() as u64 + len;
            let body = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(prefix)) })
                .chain(ReaderStream::new(file.take(len)));
            Ok(octets(total, Body::from_stream(body)))
        }
        WireCommand::PutFile => Err(ApiError::BadRequest(format!(
            "{} must be sent with POST",
            command
        ))),
    }
}

/// Wire uploads.
async fn wire_post(
    State(state): State<AppState>,
    Query(query): Query<WireQuery>,
    body: Body,
) -> Result<Response, ApiError> {
    let command = query.command()?;
    if command != WireCommand::PutFile {
        return Err(ApiError::BadRequest(format!(
            "{} does not take a body",
            command
        )));
    }
    let hash = query.hash(command)?;
    let status = receive(&state, &hash, body).await?;
    Ok(text(status.encode()))
}

/// Downloads raw content.
async fn get_bfile(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    let hash = parse_hash(&hash)?;
    let (len, file) = state.handler.open_file(&hash).await?;
    state.stats.record_download();
    Ok(octets(len, Body::from_stream(ReaderStream::new(file.take(len)))))
}

/// Reports presence, or with `SHA1-Request` the hash of what is stored.
async fn head_bfile(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let hash = parse_hash(&hash)?;
    if !headers.contains_key(SHA1_REQUEST_HEADER) {
        let (len, _) = state.handler.open_file(&hash).await?;
        let length = [(header::CONTENT_LENGTH, HeaderValue::from(len))];
        return Ok((StatusCode::OK, length).into_response());
    }

    let actual = state
        .handler
        .stored_hash(&hash)
        .await?
        .ok_or(ProtoError::NotFound(hash))?;
    state.stats.record_stat();
    Ok((StatusCode::OK, [(CONTENT_SHA1_HEADER, actual.to_hex())]).into_response())
}

/// Uploads raw content; the body must hash to the path.
async fn put_bfile(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let hash = parse_hash(&hash)?;
    match receive(&state, &hash, body).await? {
        PushStatus::Success => {
            info!(hash = %hash, "accepted upload");
            Ok(StatusCode::CREATED)
        }
        PushStatus::Failure => Err(ApiError::HashMismatch(hash)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use ballast_storage::CacheHierarchy;
    use tower::ServiceExt;

    fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheHierarchy::new(dir.path().join("repo"), dir.path().join("system"));
        (dir, AppState::new(WireHandler::new(cache)))
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, state) = test_state();
        let app = create_router(state);

        let response = app.oneshot(request("GET", "/health", Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["transfers"]["uploads"], 0);
    }

    #[tokio::test]
    async fn test_capabilities_advertise_store() {
        let (_dir, state) = test_state();
        let app = create_router(state);

        let response = app
            .oneshot(request("GET", "/?cmd=capabilities", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        assert!(String::from_utf8_lossy(&body).contains("bfilestore=serve"));
    }

    #[tokio::test]
    async fn test_wire_put_get_stat() {
        let (_dir, state) = test_state();
        let stats = state.stats.clone();
        let app = create_router(state);
        let data = b"large and binary".to_vec();
        let hash = ContentHash::compute(&data);

        let response = app
            .clone()
            .oneshot(request("POST", &format!("/?cmd=putbfile&sha={}", hash), data.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], b"0\n");

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/?cmd=statbfile&sha={}", hash), Body::empty()))
            .await
            .unwrap();
        assert_eq!(&body_bytes(response).await[..], b"0\n");

        let response = app
            .oneshot(request("GET", &format!("/?cmd=getbfile&sha={}", hash), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        let mut expected = format!("{}\n", data.len()).into_bytes();
        expected.extend_from_slice(&data);
        assert_eq!(&body[..], &expected[..]);

        assert_eq!(
            stats.snapshot(),
            TransferCounts {
                uploads: 1,
                downloads: 1,
                stats: 1
            }
        );
    }

    #[tokio::test]
    async fn test_wire_put_with_wrong_hash_reports_failure() {
        let (_dir, state) = test_state();
        let app = create_router(state.clone());
        let claimed = ContentHash::compute(b"claimed");

        let response = app
            .oneshot(request("POST", &format!("/?cmd=putbfile&sha={}", claimed), "actual"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], b"1\n");
        assert!(state.handler.cache().find_content(&claimed).is_none());
        assert_eq!(state.stats.snapshot().uploads, 0);
    }

    #[tokio::test]
    async fn test_wire_stat_missing() {
        let (_dir, state) = test_state();
        let app = create_router(state);
        let hash = ContentHash::compute(b"absent");

        let response = app
            .oneshot(request("GET", &format!("/?cmd=statbfile&sha={}", hash), Body::empty()))
            .await
            .unwrap();
        assert_eq!(&body_bytes(response).await[..], b"2\n");
    }

    #[tokio::test]
    async fn test_wire_get_missing_is_not_found() {
        let (_dir, state) = test_state();
        let app = create_router(state);
        let hash = ContentHash::compute(b"absent");

        let response = app
            .oneshot(request("GET", &format!("/?cmd=getbfile&sha={}", hash), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wire_rejects_bad_requests() {
        let (_dir, state) = test_state();
        let app = create_router(state);

        for uri in [
            "/",
            "/?cmd=frobnicate",
            "/?cmd=statbfile",
            "/?cmd=statbfile&sha=nothex",
            "/?cmd=putbfile&sha=da39a3ee5e6b4b0d3255bfef95601890afd80709",
        ] {
            let response = app
                .clone()
                .oneshot(request("GET", uri, Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_bfile_put_get_head() {
        let (_dir, state) = test_state();
        let app = create_router(state);
        let data = b"api content".to_vec();
        let hash = ContentHash::compute(&data);
        let uri = format!("/bfile/{}", hash);

        let response = app
            .clone()
            .oneshot(request("PUT", &uri, data.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request("GET", &uri, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], &data[..]);

        let head = Request::builder()
            .method("HEAD")
            .uri(&uri)
            .header(SHA1_REQUEST_HEADER, hash.to_hex())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(head).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_SHA1_HEADER).unwrap(),
            hash.to_hex().as_str()
        );
    }

    #[tokio::test]
    async fn test_bfile_head_reports_corruption() {
        let (_dir, state) = test_state();
        let hash = ContentHash::compute(b"expected");
        std::fs::create_dir_all(state.handler.cache().repo_dir()).unwrap();
        std::fs::write(state.handler.cache().cache_path(&hash), b"rotten").unwrap();
        let app = create_router(state);

        let head = Request::builder()
            .method("HEAD")
            .uri(format!("/bfile/{}", hash))
            .header(SHA1_REQUEST_HEADER, hash.to_hex())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(head).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_SHA1_HEADER).unwrap(),
            ContentHash::compute(b"rotten").to_hex().as_str()
        );
    }

    #[tokio::test]
    async fn test_bfile_head_missing_is_not_found() {
        let (_dir, state) = test_state();
        let app = create_router(state);
        let hash = ContentHash::compute(b"absent");

        let head = Request::builder()
            .method("HEAD")
            .uri(format!("/bfile/{}", hash))
            .header(SHA1_REQUEST_HEADER, hash.to_hex())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(head).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bfile_put_with_wrong_hash_is_rejected() {
        let (_dir, state) = test_state();
        let app = create_router(state);
        let claimed = ContentHash::compute(b"claimed");

        let response = app
            .oneshot(request("PUT", &format!("/bfile/{}", claimed), "actual"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_bfile_answers_advertise_store() {
        let (_dir, state) = test_state();
        let app = create_router(state);
        let hash = ContentHash::compute(b"absent");

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/bfile/{}", hash), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(STORE_HEADER).unwrap(), STORE_CAPABILITY);

        let response = app.oneshot(request("GET", "/health", Body::empty())).await.unwrap();
        assert!(response.headers().get(STORE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_chunked_upload_over_limit() {
        let (_dir, state) = test_state();
        let app = create_router(state.with_upload_limit(10));
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"12345678")), Ok(Bytes::from_static(b"12345678"))];
        let hash = ContentHash::compute(b"1234567812345678");

        let put = Request::builder()
            .method("PUT")
            .uri(format!("/bfile/{}", hash))
            .body(Body::from_stream(stream::iter(chunks)))
            .unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let head = Request::builder()
            .method("HEAD")
            .uri(format!("/bfile/{}", hash))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(head).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_limit() {
        let (_dir, state) = test_state();
        let app = create_router(state.with_upload_limit(4));
        let data = b"more than four bytes".to_vec();
        let hash = ContentHash::compute(&data);

        let put = Request::builder()
            .method("PUT")
            .uri(format!("/bfile/{}", hash))
            .header(header::CONTENT_LENGTH, data.len())
            .body(Body::from(data))
            .unwrap();
        let response = app.oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
