//! Event record framing.
//!
//! Every record is a fixed 16 byte little-endian header followed by the
//! channel name and the payload:
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────┬─────────┬─────────┐
//! │ u32 chLen  │ u32 plLen  │ i64 timestamp µs │ channel │ payload │
//! └────────────┴────────────┴──────────────────┴─────────┴─────────┘
//! ```
//!
//! There is no file header and no padding; a log is records back to back.

use std::io::{self, Read, Write};

use crate::error::CodecError;
use crate::event::{check_len, Event};

/// Fixed part of every record
pub const HEADER_SIZE: usize = 16;

/// Upper bound on buffer space reserved before bytes actually arrive.
/// Corrupt length fields then fail as truncated instead of allocating.
const MAX_PREALLOC: usize = 1 << 20;

/// Encode one record into a fresh buffer.
pub fn encode(channel: &str, payload: &[u8], timestamp_us: i64) -> Result<Vec<u8>, CodecError> {
    if channel.is_empty() {
        return Err(CodecError::EmptyChannel);
    }
    let channel_len = check_len("channel", channel.len())?;
    let payload_len = check_len("payload", payload.len())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + channel.len() + payload.len());
    buf.extend_from_slice(&channel_len.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&timestamp_us.to_le_bytes());
    buf.extend_from_slice(channel.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Append one record to a stream.
pub fn write_event<W: Write>(writer: &mut W, event: &Event) -> Result<(), CodecError> {
    let channel_len = check_len("channel", event.channel().len())?;
    let payload_len = check_len("payload", event.payload().len())?;

    writer.write_all(&channel_len.to_le_bytes())?;
    writer.write_all(&payload_len.to_le_bytes())?;
    writer.write_all(&event.timestamp_us().to_le_bytes())?;
    writer.write_all(event.channel().as_bytes())?;
    writer.write_all(event.payload())?;
    Ok(())
}

/// Read the next record from a stream.
///
/// Returns `Ok(None)` when the stream ends cleanly on a record boundary.
/// Any partial or malformed record is an error; callers treat both the same
/// way (no more data) but only the error is worth logging.
pub fn read_event<R: Read>(reader: &mut R) -> Result<Option<Event>, CodecError> {
    let mut header = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(CodecError::Truncated {
            part: "header",
            expected: HEADER_SIZE,
            actual: got,
        });
    }

    let channel_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let payload_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let timestamp_us = i64::from_le_bytes([
        header[8], header[9], header[10], header[11], header[12], header[13], header[14],
        header[15],
    ]);

    if channel_len == 0 {
        return Err(CodecError::EmptyChannel);
    }

    let channel = read_owned(reader, channel_len, "channel")?;
    let channel = String::from_utf8(channel).map_err(|_| CodecError::InvalidChannel)?;
    let payload = read_owned(reader, payload_len, "payload")?;

    Event::new(channel, payload, timestamp_us).map(Some)
}

/// Like `read_exact`, but reports how much was read instead of failing.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_owned<R: Read>(
    reader: &mut R,
    len: usize,
    part: &'static str,
) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
    reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(CodecError::Truncated {
            part,
            expected: len,
            actual: buf.len(),
        });
    }
    Ok(buf)
}
