//! Pkt-line framing.
//!
//! Each packet is prefixed with its total length as four hex digits; `0000`
//! is a flush packet that ends a section. Data packets carry at most
//! [`MAX_DATA_LEN`] bytes, so larger payloads are split across packets.

use crate::{ProtoError, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest packet, length prefix included.
pub const MAX_PKT_LEN: usize = 65520;

/// Largest payload a data packet can carry.
pub const MAX_DATA_LEN: usize = MAX_PKT_LEN - 4;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Bytes),
    /// Flush packet (0000).
    Flush,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Bytes>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Data(data) => {
                let mut out = format!("{:04x}", data.len() + 4).into_bytes();
                out.extend_from_slice(data);
                out
            }
            Self::Flush => b"0000".to_vec(),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for a flush.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Flush => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }

    /// Decodes one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed, or `None` if
    /// `buf` does not yet hold a complete packet.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = parse_len(&buf[..4])?;
        if len == 0 {
            return Ok(Some((Self::Flush, 4)));
        }
        if buf.len() < len {
            return Ok(None);
        }
        Ok(Some((
            Self::Data(Bytes::copy_from_slice(&buf[4..len])),
            len,
        )))
    }
}

fn parse_len(prefix: &[u8]) -> Result<usize> {
    let s = std::str::from_utf8(prefix)
        .map_err(|_| ProtoError::InvalidPktLine("invalid length prefix".to_string()))?;
    let len = usize::from_str_radix(s, 16)
        .map_err(|_| ProtoError::InvalidPktLine(format!("invalid length {:?}", s)))?;
    match len {
        0 => Ok(0),
        1..=3 => Err(ProtoError::InvalidPktLine(format!("length {} too small", len))),
        _ if len > MAX_PKT_LEN => Err(ProtoError::InvalidPktLine(format!(
            "length {} exceeds {}",
            len, MAX_PKT_LEN
        ))),
        _ => Ok(len),
    }
}

/// Reader for pkt-line framed streams.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet, or `None` at a clean end of stream.
    pub async fn read(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = parse_len(&len_buf)?;
        if len == 0 {
            return Ok(Some(PktLine::Flush));
        }
        let mut data = vec![0u8; len - 4];
        self.reader.read_exact(&mut data).await?;
        Ok(Some(PktLine::Data(data.into())))
    }

    /// Reads the next packet, treating end of stream as a protocol error.
    pub async fn expect(&mut self) -> Result<PktLine> {
        self.read()
            .await?
            .ok_or_else(|| ProtoError::Protocol("unexpected end of stream".to_string()))
    }

    /// Reads all packets until a flush packet.
    pub async fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.expect().await? {
                PktLine::Flush => break,
                pkt => packets.push(pkt),
            }
        }
        Ok(packets)
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line framed streams.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub async fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()).await?;
        Ok(())
    }

    /// Writes arbitrary bytes, split across as many data packets as needed.
    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_DATA_LEN) {
            self.write(&PktLine::Data(Bytes::copy_from_slice(chunk)))
                .await?;
        }
        Ok(())
    }

    /// Writes a string line (with newline).
    pub async fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write(&PktLine::Data(data.into())).await
    }

    /// Writes a flush packet.
    pub async fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush).await
    }

    /// Flushes the underlying writer.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
