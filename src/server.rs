//! Tokio-based record server: accept loop, dispatch, and shutdown.
//!
//! The server accepts TCP connections on a listen socket, spawns one
//! isolated worker task per connection, and echoes each decoded record
//! back unless a custom handler is installed. No connection can stall
//! another: the accept loop never blocks on client I/O, and workers share
//! no state beyond the [`ConnectionRegistry`].

use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use futures::Future;
use log::{info, warn};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    select, signal,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{MAX_RECORD_BYTES, RecordCodec},
    connection::{ConnectionWorker, RecordHandler},
    session::{ConnectionRegistry, DrainOutcome},
};

/// Delay used for the first retry after an `accept()` failure.
const ACCEPT_RETRY_INITIAL: Duration = Duration::from_millis(10);
/// Maximum back-off delay once retries have increased exponentially.
const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(1);

/// Errors that are fatal to server startup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Binding the listen socket failed.
    #[error("failed to bind listen socket: {0}")]
    Bind(#[source] io::Error),
    /// `run` was called before `bind`.
    #[error("server has no bound listener")]
    NotBound,
}

/// Server configuration.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    /// Port the listen socket binds on all interfaces.
    pub port: u16,
    /// Largest inbound payload accepted before the connection is dropped.
    ///
    /// One shared limit for both roles; see `ClientConfig::max_payload`.
    pub max_payload: usize,
    /// How long shutdown waits for workers before forcing teardown.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            max_payload: MAX_RECORD_BYTES,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// TCP server decoding length-prefixed text records.
///
/// # Examples
///
/// ```no_run
/// use recordwire::{RecordServer, ServerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), recordwire::ServerError> {
/// RecordServer::new(ServerConfig::default()).bind()?.run().await
/// # }
/// ```
pub struct RecordServer {
    config: ServerConfig,
    handler: RecordHandler,
    registry: Arc<ConnectionRegistry>,
    listener: Option<TcpListener>,
}

impl RecordServer {
    /// Create an unbound server with the default echo handler.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handler: Arc::new(|_, record: &str| Some(record.to_owned())),
            registry: Arc::new(ConnectionRegistry::new()),
            listener: None,
        }
    }

    /// Replace the application callback invoked per decoded record.
    #[must_use]
    pub fn handler(mut self, handler: RecordHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Registry tracking this server's live connections.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> { Arc::clone(&self.registry) }

    /// Bind the listen socket on all interfaces at the configured port.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding fails; this is fatal before
    /// the accept loop ever starts.
    pub fn bind(self) -> Result<Self, ServerError> {
        let port = self.config.port;
        self.bind_addr(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// Bind the listen socket to a specific address (tests bind port 0).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding fails.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Result<Self, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        std_listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        if let Ok(local) = listener.local_addr() {
            info!("server listening: addr={local}");
        }
        self.listener = Some(listener);
        Ok(self)
    }

    /// Address of the bound listen socket.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Run the server until Ctrl-C or SIGTERM, then drain connections.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotBound`] if [`bind`](Self::bind) was not
    /// called first.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(shutdown_signal()).await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// On shutdown the server stops accepting, requests termination of
    /// every live connection, and waits up to the configured grace period
    /// before forcibly tearing down stragglers.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotBound`] if [`bind`](Self::bind) was not
    /// called first.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let listener = self.listener.ok_or(ServerError::NotBound)?;
        let registry = self.registry;
        let handler = self.handler;
        let codec = RecordCodec::new(self.config.max_payload);
        let shutdown_token = CancellationToken::new();

        let accept = accept_loop(
            &listener,
            &registry,
            &handler,
            codec,
            shutdown_token.clone(),
        );
        tokio::pin!(shutdown);
        select! {
            () = &mut shutdown => shutdown_token.cancel(),
            () = accept => {}
        }

        // Stop accepting before asking workers to terminate.
        drop(listener);
        info!("shutting down: draining {} connection(s)", registry.len());
        match registry.drain(self.config.shutdown_grace).await {
            DrainOutcome::Graceful => info!("shutdown complete"),
            DrainOutcome::Forced { aborted } => {
                warn!("shutdown complete: {aborted} connection(s) torn down forcibly");
            }
        }
        Ok(())
    }
}

/// Accept connections until cancelled, spawning one worker per connection.
///
/// Accept failures are logged and retried with exponential back-off; they
/// never tear the server down.
async fn accept_loop(
    listener: &TcpListener,
    registry: &Arc<ConnectionRegistry>,
    handler: &RecordHandler,
    codec: RecordCodec,
    shutdown: CancellationToken,
) {
    let mut delay = ACCEPT_RETRY_INITIAL;
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => return,

            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    spawn_worker(registry, handler, codec, stream, peer);
                    delay = ACCEPT_RETRY_INITIAL;
                }
                Err(e) => {
                    warn!("accept error: error={e}");
                    sleep(delay).await;
                    delay = (delay * 2).min(ACCEPT_RETRY_MAX);
                }
            },
        }
    }
}

fn spawn_worker(
    registry: &Arc<ConnectionRegistry>,
    handler: &RecordHandler,
    codec: RecordCodec,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let (id, cancel) = registry.register(peer);
    let worker = ConnectionWorker::new(
        id,
        stream,
        peer,
        codec,
        Arc::clone(handler),
        cancel,
        Arc::clone(registry),
    );
    let handle = registry.tracker().spawn(worker.run());
    registry.attach(id, handle.abort_handle());
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut term) => {
                select! {
                    _ = signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: error={e}");
                let _ = signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
