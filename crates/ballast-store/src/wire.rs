//! Wire protocol backend.
//!
//! Runs `statbfile`, `putbfile`, and `getbfile` through a [`WireTransport`],
//! so the same backend serves both HTTP and ssh remotes.

use crate::backend::{BackendKind, StoreBackend};
use crate::open::Probe;
use crate::transport::WireTransport;
use crate::{Result, StoreError, TransferError};
use async_trait::async_trait;
use ballast_proto::{read_length_line, PushStatus, StatStatus, WireCommand};
use ballast_storage::{copy_and_hash_async, ContentHash};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::debug;

/// A store reached through wire protocol commands.
#[derive(Clone)]
pub struct WireStore {
    transport: Arc<dyn WireTransport>,
}

impl std::fmt::Debug for WireStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireStore")
            .field("url", &self.transport.url())
            .finish()
    }
}

impl WireStore {
    /// Creates a backend over `transport` without checking capabilities.
    pub fn new(transport: Arc<dyn WireTransport>) -> Self {
        Self { transport }
    }

    /// Checks that the server behind `transport` advertises store support.
    ///
    /// An unreachable server is an error; a server that answers without the
    /// capability, or does not speak the protocol at all, is `NotCapable`.
    pub async fn probe(transport: Arc<dyn WireTransport>) -> Result<Probe> {
        match transport.capabilities().await {
            Ok(caps) if caps.supports_store() => Ok(Probe::Capable(Box::new(Self::new(transport)))),
            Ok(_) => Ok(Probe::NotCapable {
                reason: StoreError::CapabilityNotSupported {
                    url: transport.url().to_string(),
                }
                .to_string(),
            }),
            Err(e @ StoreError::Unreachable { .. }) => Err(e),
            Err(e) => Ok(Probe::NotCapable {
                reason: e.to_string(),
            }),
        }
    }

    fn unexpected(&self, detail: String) -> StoreError {
        StoreError::UnexpectedResponse {
            url: self.transport.url().to_string(),
            detail,
        }
    }
}

#[async_trait]
impl StoreBackend for WireStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Wire
    }

    fn url(&self) -> &str {
        self.transport.url()
    }

    async fn stat(&self, hash: &ContentHash) -> Result<StatStatus> {
        let answer = match self.transport.call(WireCommand::StatFile, hash).await {
            Ok(answer) => answer,
            Err(StoreError::Remote { detail, .. }) => {
                debug!(hash = %hash, detail, "stat failed remotely; treating as missing");
                return Ok(StatStatus::Missing);
            }
            Err(e) => return Err(e),
        };
        StatStatus::parse(&answer).ok_or_else(|| {
            self.unexpected(format!(
                "invalid stat answer {:?}",
                String::from_utf8_lossy(&answer)
            ))
        })
    }

    async fn send(&self, file: &str, source: &Path, hash: &ContentHash) -> Result<()> {
        let answer = self
            .transport
            .call_push(WireCommand::PutFile, hash, source)
            .await
            .map_err(|e| e.for_file(file, hash, self.url()))?;
        match PushStatus::parse(&answer) {
            Some(PushStatus::Success) => Ok(()),
            Some(PushStatus::Failure) => Err(TransferError::new(
                file,
                *hash,
                self.url(),
                "server rejected upload: content does not match hash",
            )
            .into()),
            None => Err(self.unexpected(format!(
                "invalid push answer {:?}",
                String::from_utf8_lossy(&answer)
            ))),
        }
    }

    async fn fetch(
        &self,
        file: &str,
        hash: &ContentHash,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<ContentHash> {
        let stream = self
            .transport
            .call_stream(WireCommand::GetFile, hash)
            .await
            .map_err(|e| e.for_file(file, hash, self.url()))?;
        let mut reader = StreamReader::new(stream);

        let len = read_length_line(&mut reader)
            .await
            .map_err(|e| StoreError::from(e).for_file(file, hash, self.url()))?;
        let mut body = (&mut reader).take(len);
        let (actual, size) = copy_and_hash_async(&mut body, writer)
            .await
            .map_err(|e| StoreError::from(e).for_file(file, hash, self.url()))?;
        if size < len {
            return Err(TransferError::new(
                file,
                *hash,
                self.url(),
                format!("truncated download: got {} of {} bytes", size, len),
            )
            .into());
        }
        writer.flush().await?;
        tokio::io::copy(&mut reader, &mut tokio::io::sink())
            .await
            .map_err(|e| StoreError::from(e).for_file(file, hash, self.url()))?;
        Ok(actual)
    }
}
