//! Incremental reassembly of records from a fragmented byte stream.
//!
//! TCP delivers a byte stream with arbitrary fragmentation and coalescing
//! of application frames. The [`Reassembler`] carries partial state across
//! reads so that every complete frame is extracted eagerly and in order,
//! no matter how the underlying chunks were split.

use bytes::BytesMut;

use crate::codec::{CorruptFrame, RecordCodec};

/// Per-connection reassembly state.
///
/// Owned exclusively by the connection's reader; never shared across
/// connections or tasks. A corrupt frame poisons the reassembler: further
/// input is discarded and [`next_record`](Self::next_record) keeps
/// returning the original violation.
#[derive(Debug)]
pub struct Reassembler {
    pending: BytesMut,
    codec: RecordCodec,
    corrupt: Option<CorruptFrame>,
}

impl Reassembler {
    /// Create a reassembler decoding with `codec`.
    #[must_use]
    pub fn new(codec: RecordCodec) -> Self {
        Self {
            pending: BytesMut::new(),
            codec,
            corrupt: None,
        }
    }

    /// Append a chunk of raw transport bytes.
    ///
    /// An empty chunk is a no-op. Input fed after a corrupt frame is
    /// dropped; the connection is already condemned.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.corrupt.is_some() || chunk.is_empty() {
            return;
        }
        self.pending.extend_from_slice(chunk);
    }

    /// Pull the next fully-buffered record, in arrival order.
    ///
    /// `Ok(None)` means the current frame is incomplete and more bytes are
    /// needed. Callers must drain records until `Ok(None)` before returning
    /// to the transport so no fully-available frame is left pending.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptFrame`] on the first framing violation and on every
    /// call thereafter; no resynchronisation is attempted.
    pub fn next_record(&mut self) -> Result<Option<String>, CorruptFrame> {
        if let Some(corrupt) = self.corrupt {
            return Err(corrupt);
        }
        match self.codec.decode(&mut self.pending) {
            Ok(record) => Ok(record),
            Err(corrupt) => {
                self.corrupt = Some(corrupt);
                self.pending.clear();
                Err(corrupt)
            }
        }
    }

    /// Whether a partial frame is still buffered.
    ///
    /// A connection closing with a partial frame is a clean disconnect, not
    /// an error; the bytes are simply discarded with the reassembler.
    #[must_use]
    pub fn has_partial(&self) -> bool { !self.pending.is_empty() }

    /// Whether a corrupt frame has poisoned this reassembler.
    #[must_use]
    pub fn is_corrupt(&self) -> bool { self.corrupt.is_some() }
}
