//! Wire commands over HTTP.
//!
//! Commands are sent to the repository URL as `?cmd=<name>&sha=<hash>`:
//! `GET` for queries and downloads, `POST` with the file as body for uploads.

use super::{ByteStream, WireTransport};
use crate::{Result, StoreError};
use async_trait::async_trait;
use ballast_proto::{Capabilities, WireCommand, SHA_ARG};
use ballast_storage::ContentHash;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use std::path::Path;
use tokio_util::io::ReaderStream;

/// Wire protocol client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport for the repository at `url`.
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self { url, client }
    }

    fn query(
        &self,
        command: WireCommand,
        hash: Option<&ContentHash>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![("cmd", command.as_str().to_string())];
        if let Some(hash) = hash {
            query.push((SHA_ARG, hash.to_hex()));
        }
        query
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                StoreError::Unreachable {
                    url: self.url.clone(),
                    detail: e.to_string(),
                }
            } else {
                StoreError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(StoreError::Remote {
            url: self.url.clone(),
            detail: format!("{}: {}", status, text.trim()),
        })
    }
}

#[async_trait]
impl WireTransport for HttpTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        let request = self
            .client
            .get(&self.url)
            .query(&self.query(WireCommand::Capabilities, None));
        let text = self.send(request).await?.text().await?;
        Ok(Capabilities::parse(&text))
    }

    async fn call(&self, command: WireCommand, hash: &ContentHash) -> Result<Bytes> {
        let request = self
            .client
            .get(&self.url)
            .query(&self.query(command, Some(hash)));
        Ok(self.send(request).await?.bytes().await?)
    }

    async fn call_stream(&self, command: WireCommand, hash: &ContentHash) -> Result<ByteStream> {
        let request = self
            .client
            .get(&self.url)
            .query(&self.query(command, Some(hash)));
        let stream = self
            .send(request)
            .await?
            .bytes_stream()
            .map_err(std::io::Error::other);
        Ok(stream.boxed())
    }

    async fn call_push(
        &self,
        command: WireCommand,
        hash: &ContentHash,
        source: &Path,
    ) -> Result<Bytes> {
        let file = tokio::fs::File::open(source).await?;
        let len = file.metadata().await?.len();
        let request = self
            .client
            .post(&self.url)
            .query(&self.query(command, Some(hash)))
            .header(reqwest::header::CONTENT_LENGTH, len)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        Ok(self.send(request).await?.bytes().await?)
    }
}
