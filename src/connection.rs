//! Per-connection worker: one socket, one reassembler, one read loop.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    select,
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CorruptFrame, HEADER_LEN, RecordCodec},
    reassembly::Reassembler,
    session::{ConnectionId, ConnectionRegistry},
};

mod counter;

pub use counter::active_connection_count;
use counter::ActiveConnection;

/// Capacity hint for the per-read scratch buffer.
const READ_CHUNK: usize = 4096;

/// Application callback invoked with each decoded record.
///
/// Returning `Some` queues a reply frame for the same connection; replies
/// are written in the order their records were decoded.
pub type RecordHandler = Arc<dyn Fn(ConnectionId, &str) -> Option<String> + Send + Sync>;

/// Why a worker stopped reading.
#[derive(Debug)]
pub(crate) enum Termination {
    /// Peer closed the connection cleanly.
    Disconnected,
    /// The transport reported an I/O failure.
    Error(io::Error),
    /// The reassembler signalled a terminal framing violation.
    Corrupt(CorruptFrame),
    /// Server shutdown requested cancellation.
    Shutdown,
}

/// One-shot termination report to the registry.
///
/// A worker may see several triggers near-simultaneously (an error followed
/// by the disconnect notification); only the first report deregisters the
/// connection.
#[derive(Debug)]
pub(crate) struct Deregistration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
    done: bool,
}

impl Deregistration {
    pub(crate) fn new(registry: Arc<ConnectionRegistry>, id: ConnectionId) -> Self {
        Self {
            registry,
            id,
            done: false,
        }
    }

    /// Report termination; returns `false` on repeat calls.
    pub(crate) fn notify(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        self.registry.deregister(self.id)
    }
}

/// Worker owning exactly one transport connection and its reassembly state.
pub(crate) struct ConnectionWorker {
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    codec: RecordCodec,
    reassembler: Reassembler,
    handler: RecordHandler,
    shutdown: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionWorker {
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        codec: RecordCodec,
        handler: RecordHandler,
        shutdown: CancellationToken,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            id,
            stream,
            peer,
            codec,
            reassembler: Reassembler::new(codec),
            handler,
            shutdown,
            registry,
        }
    }

    /// Drive the connection until a termination trigger fires, then tear
    /// down the transport and report to the registry exactly once.
    pub(crate) async fn run(mut self) {
        let _guard = ActiveConnection::new();
        self.registry.mark_running(self.id);
        info!(
            "client connected: id={}, peer={}, active={}",
            self.id,
            self.peer,
            active_connection_count(),
        );

        let reason = self.read_loop().await;

        self.registry.mark_terminating(self.id);
        match &reason {
            Termination::Disconnected => {
                info!("client disconnected: id={}, peer={}", self.id, self.peer);
            }
            Termination::Error(e) => {
                warn!("connection error: id={}, peer={}, error={e}", self.id, self.peer);
            }
            Termination::Corrupt(violation) => {
                // Emit via both `log` and `tracing` for tests that capture
                // either.
                warn!(
                    "corrupt frame: id={}, peer={}, violation={violation}",
                    self.id, self.peer,
                );
                tracing::warn!(id = %self.id, peer = %self.peer, %violation, "corrupt frame");
            }
            Termination::Shutdown => {
                debug!("connection cancelled by shutdown: id={}", self.id);
            }
        }
        if self.reassembler.has_partial() {
            // Clean disconnect mid-frame; the partial bytes die with us.
            debug!("discarding partial frame: id={}", self.id);
        }

        let _ = self.stream.shutdown().await;
        let mut report = Deregistration::new(Arc::clone(&self.registry), self.id);
        report.notify();
    }

    async fn read_loop(&mut self) -> Termination {
        let mut chunk = BytesMut::with_capacity(READ_CHUNK);
        loop {
            select! {
                biased;

                () = self.shutdown.cancelled() => return Termination::Shutdown,

                res = self.stream.read_buf(&mut chunk) => match res {
                    Ok(0) => return Termination::Disconnected,
                    Ok(_) => {
                        self.reassembler.feed(&chunk);
                        chunk.clear();
                        if let Some(reason) = self.dispatch_ready().await {
                            return reason;
                        }
                    }
                    Err(e) => return Termination::Error(e),
                },
            }
        }
    }

    /// Hand every fully-reassembled record to the handler, writing replies
    /// in decode order.
    async fn dispatch_ready(&mut self) -> Option<Termination> {
        loop {
            match self.reassembler.next_record() {
                Ok(Some(record)) => {
                    info!("record received: id={}, bytes={}", self.id, record.len());
                    let reply = (self.handler)(self.id, &record);
                    if let Some(reply) = reply {
                        if let Err(e) = self.send_reply(&reply).await {
                            return Some(Termination::Error(e));
                        }
                    }
                }
                Ok(None) => return None,
                Err(violation) => return Some(Termination::Corrupt(violation)),
            }
        }
    }

    async fn send_reply(&mut self, reply: &str) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + reply.len());
        match self.codec.encode(reply, &mut buf) {
            Ok(()) => self.stream.write_all(&buf).await,
            Err(e) => {
                // Caller's fault, not fatal to the connection.
                warn!("reply dropped: id={}, error={e}", self.id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr { "127.0.0.1:9999".parse().expect("peer addr") }

    #[test]
    fn termination_is_reported_exactly_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, _cancel) = registry.register(peer());

        let mut report = Deregistration::new(Arc::clone(&registry), id);
        // First trigger (e.g. a transport error) deregisters...
        assert!(report.notify());
        assert!(registry.is_empty());
        // ...the trailing disconnect notification is swallowed.
        assert!(!report.notify());
    }
}
