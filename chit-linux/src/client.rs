//! Client session: one connection to the Host, handshake, relay.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chit_core::identity::{display_name, ANONYMOUS_NAME};
use chit_core::MessageSink;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::connection::{CloseReason, Connection, ConnectionError};
use crate::relay::Relay;
use crate::status::StatusSignal;

/// Peer label used for the Host connection in logs.
const HOST_PEER: &str = "host";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("handshake with host failed: {0}")]
    Handshake(#[source] ConnectionError),
    #[error("connect cancelled")]
    Cancelled,
    #[error("client already started")]
    AlreadyStarted,
}

pub struct ClientSession {
    host_addr: String,
    display_name: String,
    sink: Arc<dyn MessageSink>,
    status: Arc<StatusSignal>,
    state: watch::Sender<ClientState>,
    /// Send path to the Host; cleared on disconnect.
    relay: Mutex<Option<Arc<Relay>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ClientSession {
    /// `host_addr` is `<host>:<port>`.
    pub fn new(
        host_addr: &str,
        name: &str,
        sink: Arc<dyn MessageSink>,
        status: Arc<StatusSignal>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ClientState::Idle);
        Arc::new(Self {
            host_addr: host_addr.to_string(),
            display_name: display_name(name, ANONYMOUS_NAME),
            sink,
            status,
            state,
            relay: Mutex::new(None),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn host_addr(&self) -> &str {
        &self.host_addr
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Send path to the Host, `None` unless connected.
    pub fn relay(&self) -> Option<Arc<Relay>> {
        self.relay_slot().clone()
    }

    fn relay_slot(&self) -> MutexGuard<'_, Option<Arc<Relay>>> {
        self.relay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idle → Connecting → Connected. On failure → Disconnected with
    /// connected=false published; the caller must start a new session to retry.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let claimed = self.state.send_if_modified(|s| {
            if *s == ClientState::Idle {
                *s = ClientState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ClientError::AlreadyStarted);
        }
        let stream = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ClientError::Cancelled),
            r = TcpStream::connect(self.host_addr.as_str()) => r.map_err(|source| ClientError::Connect {
                addr: self.host_addr.clone(),
                source,
            }),
        };
        let result = match stream {
            Ok(stream) => self.establish(stream).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(host = %self.host_addr, error = %e, "connect failed");
            self.state.send_replace(ClientState::Disconnected);
            self.status.set_connected(false);
        }
        result
    }

    async fn establish(self: &Arc<Self>, stream: TcpStream) -> Result<(), ClientError> {
        let mut conn = Connection::from_tcp(stream, self.shutdown.child_token()).map_err(|source| {
            ClientError::Connect {
                addr: self.host_addr.clone(),
                source,
            }
        })?;
        if self.shutdown.is_cancelled() {
            conn.close().await;
            return Err(ClientError::Cancelled);
        }
        conn.set_peer_name(HOST_PEER);
        let handle = conn.handle();
        if let Err(e) = handle.send(&self.display_name) {
            conn.close().await;
            return Err(ClientError::Handshake(e));
        }
        let relay = Arc::new(Relay::client(
            Arc::clone(&self.sink),
            handle,
            &self.tasks,
            self.shutdown.child_token(),
        ));
        *self.relay_slot() = Some(Arc::clone(&relay));
        self.state.send_replace(ClientState::Connected);
        self.status.set_connected(true);
        info!(host = %self.host_addr, name = %self.display_name, "connected");

        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            let relay = &relay;
            let reason = conn
                .read_loop(move |line| relay.on_line(HOST_PEER, line))
                .await;
            this.on_disconnected(&reason);
        });
        Ok(())
    }

    fn on_disconnected(&self, reason: &CloseReason) {
        self.relay_slot().take();
        self.state.send_replace(ClientState::Disconnected);
        if self.status.mark_disconnected() {
            match reason {
                CloseReason::Stopped => info!(host = %self.host_addr, "disconnected"),
                other => warn!(host = %self.host_addr, reason = ?other, "connection to host lost"),
            }
        }
    }

    /// Close the transport if open and wait for the read loop. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.relay_slot().take();
        self.state.send_replace(ClientState::Disconnected);
        self.status.mark_disconnected();
    }
}
