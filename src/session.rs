//! Registry of live connections.
//!
//! The registry is the only state shared between the accept path and the
//! per-connection workers. It issues connection identifiers, tracks each
//! connection from acceptance to removal, and drives the bounded shutdown
//! drain.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use log::warn;
use tokio::{task::AbortHandle, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long forced teardown waits for aborted tasks to finish.
const FORCED_WAIT: Duration = Duration::from_secs(1);

/// Identifier assigned to a connection.
///
/// Issued monotonically by the registry at accept time and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a registered connection.
///
/// `Removed` is modelled as absence from the registry; once a handle is
/// gone it must never be touched again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted and worker constructed, read loop not yet polled.
    Accepted,
    /// Worker read loop active.
    Running,
    /// A termination trigger fired; the worker is tearing down.
    Terminating,
}

#[derive(Debug)]
struct ConnectionHandle {
    peer: SocketAddr,
    cancel: CancellationToken,
    state: ConnectionState,
    abort: Option<AbortHandle>,
}

/// Result of draining the registry during shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every worker terminated within the grace period.
    Graceful,
    /// Some workers ignored the graceful close and were torn down forcibly.
    Forced {
        /// Number of workers aborted.
        aborted: usize,
    },
}

/// Concurrent bookkeeping of live connections.
///
/// A handle is present from the moment its worker is registered until the
/// worker has fully terminated; workers deregister themselves on their
/// single exit path. Insertions happen on the accept task while removals
/// happen on each worker's own task, so the map must tolerate concurrent
/// mutation.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    next_id: AtomicU64,
    tracker: TaskTracker,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            tracker: TaskTracker::new(),
        }
    }

    /// Register a newly accepted connection.
    ///
    /// Issues a fresh [`ConnectionId`] and the cancellation token the
    /// worker must obey. The connection starts in
    /// [`ConnectionState::Accepted`].
    #[must_use]
    pub fn register(&self, peer: SocketAddr) -> (ConnectionId, CancellationToken) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        self.connections.insert(
            id,
            ConnectionHandle {
                peer,
                cancel: cancel.clone(),
                state: ConnectionState::Accepted,
                abort: None,
            },
        );
        (id, cancel)
    }

    /// Attach the abort handle of the worker task driving `id`.
    ///
    /// A no-op if the worker already deregistered itself.
    pub fn attach(&self, id: ConnectionId, abort: AbortHandle) {
        if let Some(mut handle) = self.connections.get_mut(&id) {
            handle.abort = Some(abort);
        }
    }

    /// Mark the worker's read loop as active.
    pub fn mark_running(&self, id: ConnectionId) { self.set_state(id, ConnectionState::Running); }

    /// Mark the worker as tearing down.
    pub fn mark_terminating(&self, id: ConnectionId) {
        self.set_state(id, ConnectionState::Terminating);
    }

    fn set_state(&self, id: ConnectionId, state: ConnectionState) {
        if let Some(mut handle) = self.connections.get_mut(&id) {
            handle.state = state;
        }
    }

    /// Remove `id` once its worker has fully terminated.
    ///
    /// Returns `false` if the handle was already removed.
    pub fn deregister(&self, id: ConnectionId) -> bool { self.connections.remove(&id).is_some() }

    /// Peer address of a live connection.
    #[must_use]
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|handle| handle.peer)
    }

    /// Lifecycle state of a live connection.
    #[must_use]
    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|handle| handle.state)
    }

    /// Identifiers of the currently live connections.
    #[must_use]
    pub fn live_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize { self.connections.len() }

    /// Whether the live set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    /// Tracker on which worker tasks must be spawned for the drain to
    /// observe them.
    #[must_use]
    pub fn tracker(&self) -> &TaskTracker { &self.tracker }

    /// Request cancellation of every live connection.
    pub fn cancel_all(&self) {
        for entry in self.connections.iter() {
            entry.cancel.cancel();
        }
    }

    /// Drain the live set during shutdown.
    ///
    /// Requests cancellation of every worker and waits up to `grace` for
    /// them to terminate. Workers still registered after the grace period
    /// are aborted and their handles cleared, so the drain is total and
    /// never hangs on a misbehaving peer.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.cancel_all();
        self.tracker.close();
        if timeout(grace, self.tracker.wait()).await.is_ok() {
            return DrainOutcome::Graceful;
        }

        let mut aborted = 0;
        for entry in self.connections.iter() {
            if let Some(abort) = &entry.abort {
                abort.abort();
                aborted += 1;
            }
        }
        warn!("shutdown grace expired: aborting {aborted} unresponsive connection(s)");
        if timeout(FORCED_WAIT, self.tracker.wait()).await.is_err() {
            warn!("aborted connection tasks did not settle; clearing registry anyway");
        }
        self.connections.clear();
        DrainOutcome::Forced { aborted }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self { Self::new() }
}
