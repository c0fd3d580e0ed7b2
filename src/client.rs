//! Client runtime for record connections.
//!
//! The client mirrors the server's framing layer against a single outbound
//! connection. It is a single-threaded reactor: one stream, one
//! reassembler, no internal tasks and no locking. Inbound records are
//! delivered in arrival order from [`RecordClient::recv`].

use std::{collections::VecDeque, io, net::SocketAddr};

use bytes::BytesMut;
use log::debug;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{
    codec::{CorruptFrame, EncodeError, HEADER_LEN, MAX_RECORD_BYTES, RecordCodec},
    reassembly::Reassembler,
};

/// Capacity hint for the per-read scratch buffer.
const READ_CHUNK: usize = 4096;

/// Errors emitted by [`RecordClient`] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Establishing the connection failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Destination that refused or timed out.
        addr: SocketAddr,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Transport failure on an established connection.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The outbound record does not fit the length field.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// A send or receive was attempted with no active connection.
    #[error("not connected")]
    NotConnected,
    /// The peer sent a frame violating the protocol; the connection was
    /// torn down.
    #[error("corrupt inbound frame: {0}")]
    Corrupt(#[from] CorruptFrame),
}

/// Client configuration.
#[derive(Clone, Copy, Debug)]
pub struct ClientConfig {
    /// Destination server address.
    pub addr: SocketAddr,
    /// Largest inbound payload accepted before the connection is dropped.
    ///
    /// Earlier revisions enforced 4096 here while the server accepted
    /// 65 535, a latent interoperability hazard. Both roles now share the
    /// [`MAX_RECORD_BYTES`] default; override deliberately.
    pub max_payload: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            max_payload: MAX_RECORD_BYTES,
        }
    }
}

/// TCP client sending and receiving length-prefixed text records.
///
/// # Examples
///
/// ```no_run
/// use recordwire::{ClientConfig, RecordClient};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), recordwire::ClientError> {
/// let mut client = RecordClient::connect(ClientConfig::default()).await?;
/// client.send("UserID:7 userName:Ann email:ann@x.com").await?;
/// if let Some(reply) = client.recv().await? {
///     println!("server replied: {reply}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RecordClient {
    stream: Option<TcpStream>,
    codec: RecordCodec,
    reassembler: Reassembler,
    inbox: VecDeque<String>,
    /// Violation observed but not yet surfaced; records decoded before it
    /// are delivered first.
    corrupt: Option<CorruptFrame>,
}

impl RecordClient {
    /// Connect to the configured server address.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the TCP connection cannot be
    /// established.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(config.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: config.addr,
                source,
            })?;
        debug!("connected: addr={}", config.addr);
        let codec = RecordCodec::new(config.max_payload);
        Ok(Self {
            stream: Some(stream),
            codec,
            reassembler: Reassembler::new(codec),
            inbox: VecDeque::new(),
            corrupt: None,
        })
    }

    /// Whether the connection is still active.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.stream.is_some() }

    /// Send one record as a single frame.
    ///
    /// Frames are written whole and in call order; partial frames never
    /// interleave on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] with no active connection,
    /// [`ClientError::Encode`] if the record exceeds the length field's
    /// range, or [`ClientError::Io`] if the write fails.
    pub async fn send(&mut self, record: &str) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + record.len());
        self.codec.encode(record, &mut buf)?;
        match stream.write_all(&buf).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stream = None;
                Err(ClientError::Io(e))
            }
        }
    }

    /// Receive the next inbound record, in arrival order.
    ///
    /// Blocks until a complete record is available. `Ok(None)` signals a
    /// clean disconnect by the peer; a partial frame pending at that point
    /// is discarded, not an error. After a disconnect, further calls keep
    /// returning `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Corrupt`] if the peer violates the framing
    /// protocol (the connection is aborted), or [`ClientError::Io`] on
    /// transport failure.
    pub async fn recv(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            if let Some(record) = self.inbox.pop_front() {
                return Ok(Some(record));
            }
            if let Some(violation) = self.corrupt.take() {
                return Err(ClientError::Corrupt(violation));
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            let mut chunk = BytesMut::with_capacity(READ_CHUNK);
            match stream.read_buf(&mut chunk).await {
                Ok(0) => {
                    if self.reassembler.has_partial() {
                        debug!("peer closed mid-frame; discarding partial record");
                    }
                    self.stream = None;
                    return Ok(None);
                }
                Ok(_) => {
                    self.reassembler.feed(&chunk);
                    if let Err(violation) = self.drain_ready() {
                        // Records decoded ahead of the violation drain out
                        // first; the error surfaces once the inbox is empty.
                        self.close().await;
                        self.corrupt = Some(violation);
                    }
                }
                Err(e) => {
                    self.stream = None;
                    return Err(ClientError::Io(e));
                }
            }
        }
    }

    /// Close the connection, discarding any partial inbound frame.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn drain_ready(&mut self) -> Result<(), CorruptFrame> {
        while let Some(record) = self.reassembler.next_record()? {
            self.inbox.push_back(record);
        }
        Ok(())
    }
}
