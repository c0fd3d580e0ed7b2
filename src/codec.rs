//! Frame encoding and decoding for text records.
//!
//! A record travels on the wire as a 2-byte big-endian payload length
//! followed by exactly that many UTF-8 bytes. The length never counts the
//! header itself; there is no magic number, version byte, or checksum.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Size of the length prefix preceding each record.
pub const HEADER_LEN: usize = 2;

/// Largest payload representable by the 2-byte length field.
pub const MAX_RECORD_BYTES: usize = u16::MAX as usize;

/// Errors produced when encoding an outbound record.
///
/// An encode failure is the caller's fault and is never fatal to a
/// connection.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EncodeError {
    /// The UTF-8 encoding of the record exceeds the length field's range.
    #[error("record of {len} bytes exceeds the {MAX_RECORD_BYTES} byte frame limit")]
    RecordTooLong {
        /// Byte length of the rejected record.
        len: usize,
    },
}

/// Terminal framing violations.
///
/// A corrupt frame cannot be skipped: a mis-parsed length field is
/// indistinguishable from legitimate oversized content, so resynchronising
/// would silently corrupt subsequent frames. The connection must be torn
/// down.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CorruptFrame {
    /// The header declares a payload larger than the configured limit.
    #[error("declared payload of {declared} bytes exceeds the {limit} byte limit")]
    Oversized {
        /// Payload length declared by the frame header.
        declared: usize,
        /// Limit the receiving role was configured with.
        limit: usize,
    },
    /// The payload bytes are not valid UTF-8.
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Stateless encoder/decoder for length-prefixed text records.
///
/// `max_payload` is a per-role policy limit applied on the read path; both
/// roles default to the shared [`MAX_RECORD_BYTES`] limit. Decoding operates
/// on the caller's buffer: a successful decode consumes exactly the frame's
/// bytes and leaves any following bytes in place, while incomplete input is
/// left untouched.
#[derive(Clone, Copy, Debug)]
pub struct RecordCodec {
    max_payload: usize,
}

impl RecordCodec {
    /// Create a codec enforcing `max_payload` on inbound frames.
    #[must_use]
    pub const fn new(max_payload: usize) -> Self { Self { max_payload } }

    /// Inbound payload limit this codec enforces.
    #[must_use]
    pub const fn max_payload(&self) -> usize { self.max_payload }

    /// Encode `record` and append the framed bytes to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RecordTooLong`] if the record's UTF-8 byte
    /// length does not fit the 2-byte length field.
    pub fn encode(&self, record: &str, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let len = u16::try_from(record.len())
            .map_err(|_| EncodeError::RecordTooLong { len: record.len() })?;
        dst.reserve(HEADER_LEN + record.len());
        dst.put_u16(len);
        dst.extend_from_slice(record.as_bytes());
        Ok(())
    }

    /// Attempt to decode one record from the front of `src`.
    ///
    /// Returns `Ok(None)` while the header or the declared payload is not
    /// yet fully buffered; the caller should read more bytes and retry. The
    /// oversize check runs as soon as the header is readable, without
    /// waiting for the body.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptFrame`] when the header declares a payload beyond
    /// `max_payload` or the payload is not valid UTF-8.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<String>, CorruptFrame> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let declared = usize::from(u16::from_be_bytes([src[0], src[1]]));
        if declared > self.max_payload {
            return Err(CorruptFrame::Oversized {
                declared,
                limit: self.max_payload,
            });
        }
        if src.len() < HEADER_LEN + declared {
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(declared);
        let record = std::str::from_utf8(&payload)
            .map_err(|_| CorruptFrame::InvalidUtf8)?
            .to_owned();
        Ok(Some(record))
    }
}

impl Default for RecordCodec {
    fn default() -> Self { Self::new(MAX_RECORD_BYTES) }
}
