//! HTTP API backend.
//!
//! Content lives at `<base>/bfile/<hash>`: `PUT` uploads, `GET` downloads.
//! A `HEAD` carrying `SHA1-Request: <hash>` asks the server to re-hash what
//! it holds and answer in a `Content-SHA1` header.

use crate::backend::{BackendKind, StoreBackend};
use crate::open::Probe;
use crate::{Result, StoreError, TransferError};
use async_trait::async_trait;
use ballast_proto::{
    Capabilities, StatStatus, CONTENT_SHA1_HEADER, SHA1_REQUEST_HEADER, STORE_HEADER,
};
use ballast_storage::{ContentHash, ContentHasher};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// A store reached through the `<base>/bfile/<hash>` HTTP API.
#[derive(Debug, Clone)]
pub struct HttpApiStore {
    url: String,
    client: Client,
}

impl HttpApiStore {
    /// Creates a backend for `url`.
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self { url, client }
    }

    /// Checks whether `url` serves the HTTP API.
    ///
    /// The answer to a status request must advertise the store capability
    /// in its `bfile-store` header; the status code alone proves nothing.
    pub async fn probe(url: &str, client: Client) -> Result<Probe> {
        let store = Self::new(url, client);
        let hash = ContentHash::compute(b"");
        let response = store
            .client
            .head(store.file_url(&hash))
            .header(SHA1_REQUEST_HEADER, hash.to_hex())
            .send()
            .await
            .map_err(|e| store.request_error(e))?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
            return Ok(Probe::NotCapable {
                reason: format!("status request answered {}", status),
            });
        }
        let advertised = response
            .headers()
            .get(STORE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Capabilities::parse);
        match advertised {
            Some(caps) if caps.supports_store() => Ok(Probe::Capable(Box::new(store))),
            Some(caps) => Ok(Probe::NotCapable {
                reason: format!("server advertises '{}'", caps),
            }),
            None => Ok(Probe::NotCapable {
                reason: format!("no {} header in answer", STORE_HEADER),
            }),
        }
    }

    fn file_url(&self, hash: &ContentHash) -> String {
        format!("{}/bfile/{}", self.url, hash)
    }

    fn request_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_connect() || err.is_timeout() {
            StoreError::Unreachable {
                url: self.url.clone(),
                detail: err.to_string(),
            }
        } else {
            StoreError::Http(err)
        }
    }
}

#[async_trait]
impl StoreBackend for HttpApiStore {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpApi
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn stat(&self, hash: &ContentHash) -> Result<StatStatus> {
        let response = self
            .client
            .head(self.file_url(hash))
            .header(SHA1_REQUEST_HEADER, hash.to_hex())
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(StatStatus::Missing),
            status if status.is_success() => {
                let reported = response
                    .headers()
                    .get(CONTENT_SHA1_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| ContentHash::from_hex(v.trim()).ok());
                Ok(match reported {
                    Some(reported) if reported == *hash => StatStatus::Ok,
                    _ => StatStatus::Mismatch,
                })
            }
            status => Err(StoreError::UnexpectedResponse {
                url: self.url.clone(),
                detail: format!("status request answered {}", status),
            }),
        }
    }

    async fn send(&self, file: &str, source: &Path, hash: &ContentHash) -> Result<()> {
        let source = tokio::fs::File::open(source).await?;
        let len = source.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(source));

        let response = self
            .client
            .put(self.file_url(hash))
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransferError::new(
                file,
                *hash,
                &self.url,
                format!("upload rejected with {}: {}", status, text.trim()),
            )
            .into());
        }
        debug!(hash = %hash, len, "uploaded over http api");
        Ok(())
    }

    async fn fetch(
        &self,
        file: &str,
        hash: &ContentHash,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<ContentHash> {
        let response = self
            .client
            .get(self.file_url(hash))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = if status == StatusCode::NOT_FOUND {
                "not found in store".to_string()
            } else {
                format!("download answered {}", status)
            };
            return Err(TransferError::new(file, *hash, &self.url, detail).into());
        }

        let mut hasher = ContentHasher::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                StoreError::from(TransferError::new(file, *hash, &self.url, e.to_string()))
            })?;
            hasher.update(&chunk);
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(hasher.finalize())
    }
}
