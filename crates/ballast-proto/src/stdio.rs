//! Pkt-line request/response framing over a byte pipe.
//!
//! A request is a data packet naming the command, one data packet per
//! argument (`<name> <value>`), and a flush. `putbfile` then streams the
//! upload as data packets terminated by another flush.
//!
//! A response starts with `ok` or `err <message>`, followed by the payload as
//! data packets and a flush.

use crate::{
    length_line, PktLine, PktLineReader, PktLineWriter, ProtoError, PushStatus, Result,
    WireCommand, WireHandler, SHA_ARG,
};
use ballast_storage::{ContentHash, BLOCK_SIZE};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// A decoded request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command to run.
    pub command: WireCommand,
    /// Command arguments.
    pub args: BTreeMap<String, String>,
}

impl Request {
    /// Returns the content hash argument.
    pub fn hash(&self) -> Result<ContentHash> {
        let value = self
            .args
            .get(SHA_ARG)
            .ok_or_else(|| ProtoError::MissingArgument {
                command: self.command.to_string(),
                name: SHA_ARG.to_string(),
            })?;
        Ok(ContentHash::from_hex(value)?)
    }
}

/// Writes a request header.
pub async fn write_request<W>(
    writer: &mut PktLineWriter<W>,
    command: WireCommand,
    args: &[(&str, &str)],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_line(command.as_str()).await?;
    for (name, value) in args {
        writer.write_line(&format!("{} {}", name, value)).await?;
    }
    writer.flush_pkt().await
}

/// Reads a request header, or `None` if the peer closed the pipe.
pub async fn read_request<R>(reader: &mut PktLineReader<R>) -> Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let Some(first) = reader.read().await? else {
        return Ok(None);
    };
    let name = first
        .as_str()
        .ok_or_else(|| ProtoError::Protocol("expected command line".to_string()))?;
    let command: WireCommand = name.parse()?;

    let mut args = BTreeMap::new();
    for pkt in reader.read_until_flush().await? {
        let line = pkt
            .as_str()
            .ok_or_else(|| ProtoError::Protocol("argument is not text".to_string()))?;
        let (key, value) = line
            .split_once(' ')
            .ok_or_else(|| ProtoError::Protocol(format!("malformed argument {:?}", line)))?;
        args.insert(key.to_string(), value.to_string());
    }
    Ok(Some(Request { command, args }))
}

/// Streams `body` as data packets followed by a flush.
pub async fn write_body<W, R>(writer: &mut PktLineWriter<W>, body: &mut R) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = body.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_data(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush_pkt().await?;
    Ok(total)
}

/// Turns the data packets up to the next flush into a byte stream.
pub fn body_stream<R>(
    reader: &mut PktLineReader<R>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + '_
where
    R: AsyncRead + Unpin + Send,
{
    stream::unfold(Some(reader), |state| async move {
        let reader = state?;
        match reader.read().await {
            Ok(Some(PktLine::Data(data))) => Some((Ok(data), Some(reader))),
            Ok(Some(PktLine::Flush)) => None,
            Ok(None) => Some((
                Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside body",
                )),
                None,
            )),
            Err(e) => Some((Err(std::io::Error::other(e)), None)),
        }
    })
}

/// Reads a response status line. `err` responses are returned as
/// [`ProtoError::Remote`] after their trailing flush is consumed.
pub async fn read_status<R>(reader: &mut PktLineReader<R>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let pkt = reader.expect().await?;
    match pkt.as_str() {
        Some("ok") => Ok(()),
        Some(line) if line.starts_with("err") => {
            let message = line.trim_start_matches("err").trim().to_string();
            reader.read_until_flush().await?;
            Err(ProtoError::Remote(message))
        }
        _ => Err(ProtoError::Protocol(format!(
            "unexpected response status {:?}",
            pkt
        ))),
    }
}

/// Reads a whole response payload.
pub async fn read_payload<R>(reader: &mut PktLineReader<R>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    for pkt in reader.read_until_flush().await? {
        if let Some(data) = pkt.data() {
            out.extend_from_slice(data);
        }
    }
    Ok(out)
}

async fn write_error<W>(writer: &mut PktLineWriter<W>, err: &ProtoError) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_line(&format!("err {}", err)).await?;
    writer.flush_pkt().await
}

/// Answers requests from `input` on `output` until `input` closes.
pub async fn serve<R, W>(handler: &WireHandler, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin,
{
    let mut reader = PktLineReader::new(input);
    let mut writer = PktLineWriter::new(output);

    while let Some(request) = read_request(&mut reader).await? {
        debug!(command = %request.command, "stdio request");
        match request.command {
            WireCommand::Capabilities => {
                writer.write_line("ok").await?;
                writer
                    .write_line(&handler.capabilities().to_string())
                    .await?;
                writer.flush_pkt().await?;
            }
            WireCommand::StatFile => {
                let status = match request.hash() {
                    Ok(hash) => handler.stat_file(&hash).await,
                    Err(e) => Err(e),
                };
                match status {
                    Ok(status) => {
                        writer.write_line("ok").await?;
                        writer.write_data(status.encode().as_bytes()).await?;
                        writer.flush_pkt().await?;
                    }
                    Err(e) => write_error(&mut writer, &e).await?,
                }
            }
            WireCommand::GetFile => {
                let opened = match request.hash() {
                    Ok(hash) => handler.open_file(&hash).await,
                    Err(e) => Err(e),
                };
                match opened {
                    Ok((len, mut file)) => {
                        writer.write_line("ok").await?;
                        writer.write_data(length_line(len).as_bytes()).await?;
                        let mut sent = 0u64;
                        let mut buf = vec![0u8; BLOCK_SIZE];
                        while sent < len {
                            let n = file.read(&mut buf).await?;
                            if n == 0 {
                                break;
                            }
                            writer.write_data(&buf[..n]).await?;
                            sent += n as u64;
                        }
                        writer.flush_pkt().await?;
                    }
                    Err(e) => write_error(&mut writer, &e).await?,
                }
            }
            WireCommand::PutFile => {
                let hash = request.hash();
                let mut body = StreamReader::new(Box::pin(body_stream(&mut reader).fuse()));
                let status = match &hash {
                    Ok(hash) => handler.put_file(hash, &mut body).await,
                    Err(_) => Ok(PushStatus::Failure),
                };
                // Whatever the handler left unread still belongs to this request.
                tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
                drop(body);
                match (hash, status) {
                    (Ok(_), Ok(status)) => {
                        writer.write_line("ok").await?;
                        writer.write_data(status.encode().as_bytes()).await?;
                        writer.flush_pkt().await?;
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "upload failed");
                        write_error(&mut writer, &e).await?;
                    }
                }
            }
        }
        writer.flush().await?;
    }
    Ok(())
}
