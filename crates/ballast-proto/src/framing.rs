//! Length-prefixed payload framing for `getbfile`.
//!
//! The payload is the decimal byte count and a newline, followed by exactly
//! that many raw bytes. The reader never relies on the connection closing to
//! find the end of the content.

use crate::{ProtoError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_LENGTH_LINE: usize = 24;

/// Encodes the length line for a payload of `len` bytes.
pub fn length_line(len: u64) -> String {
    format!("{}\n", len)
}

/// Reads a length line, consuming exactly the line and nothing after it.
pub async fn read_length_line<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(MAX_LENGTH_LINE);
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtoError::Protocol(
                    "stream ended before length line".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if byte == b'\n' {
            break;
        }
        if line.len() == MAX_LENGTH_LINE {
            return Err(ProtoError::Protocol("length line too long".to_string()));
        }
        line.push(byte);
    }
    std::str::from_utf8(&line)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            ProtoError::Protocol(format!(
                "invalid length line {:?}",
                String::from_utf8_lossy(&line)
            ))
        })
}
