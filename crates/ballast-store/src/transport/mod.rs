//! Transports that carry wire protocol commands.

mod http;
mod ssh;

pub use http::HttpTransport;
pub use ssh::{SshTarget, SshTransport};

use crate::Result;
use async_trait::async_trait;
use ballast_proto::{Capabilities, WireCommand};
use ballast_storage::ContentHash;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

/// A streamed response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Carries wire commands to a server and returns its answers.
#[async_trait]
pub trait WireTransport: Send + Sync {
    /// Server URL, for diagnostics.
    fn url(&self) -> &str;

    /// Asks for the server's capabilities.
    async fn capabilities(&self) -> Result<Capabilities>;

    /// Runs a command for `hash` and returns the whole answer.
    async fn call(&self, command: WireCommand, hash: &ContentHash) -> Result<Bytes>;

    /// Runs a command for `hash` and streams the answer.
    async fn call_stream(&self, command: WireCommand, hash: &ContentHash) -> Result<ByteStream>;

    /// Runs a command for `hash` that uploads the file at `source`.
    async fn call_push(
        &self,
        command: WireCommand,
        hash: &ContentHash,
        source: &Path,
    ) -> Result<Bytes>;
}
