//! Host session: listen, handshake each client, register it, relay its lines.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};

use chit_core::identity::{display_name, guest_name};
use chit_core::MessageSink;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::registry::BroadcastRegistry;
use crate::relay::Relay;
use crate::status::StatusSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Starting,
    Listening,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no usable network address; is this machine on a network?")]
    NoNetwork,
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("host already started")]
    AlreadyStarted,
}

pub struct HostSession {
    display_name: String,
    bind_addr: IpAddr,
    advertise_addr: Option<IpAddr>,
    port: u16,
    status: Arc<StatusSignal>,
    registry: Arc<BroadcastRegistry>,
    relay: Arc<Relay>,
    state: watch::Sender<HostState>,
    address: OnceLock<SocketAddr>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl HostSession {
    /// Create an idle session. Must be called inside a tokio runtime.
    pub fn new(
        config: &Config,
        name: &str,
        sink: Arc<dyn MessageSink>,
        status: Arc<StatusSignal>,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let registry = Arc::new(BroadcastRegistry::new());
        let relay = Arc::new(Relay::host(
            sink,
            registry.clone(),
            &tasks,
            shutdown.child_token(),
        ));
        let (state, _) = watch::channel(HostState::Idle);
        Arc::new(Self {
            display_name: display_name(name, chit_core::identity::DEFAULT_HOST_NAME),
            bind_addr: config.bind_addr,
            advertise_addr: config.advertise_addr,
            port: config.port,
            status,
            registry,
            relay,
            state,
            address: OnceLock::new(),
            shutdown,
            tasks,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    /// Advertised `<ip>:<port>` once listening.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address.get().copied()
    }

    pub fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }

    pub async fn client_count(&self) -> usize {
        self.registry.len().await
    }

    /// Idle → Starting → Listening, or → Stopped with the error reported once
    /// through the status signal.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, HostError> {
        let claimed = self.state.send_if_modified(|s| {
            if *s == HostState::Idle {
                *s = HostState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(HostError::AlreadyStarted);
        }
        match self.listen().await {
            Ok((listener, advertised)) => {
                let _ = self.address.set(advertised);
                self.state.send_replace(HostState::Listening);
                self.status
                    .set_host_address(Some(format!("Hosting on: {advertised}")));
                self.status.set_connected(true);
                info!(name = %self.display_name, %advertised, "hosting");
                let this = Arc::clone(self);
                self.tasks.spawn(this.accept_loop(listener));
                Ok(advertised)
            }
            Err(e) => {
                error!(error = %e, "host start failed");
                self.state.send_replace(HostState::Stopped);
                self.shutdown.cancel();
                self.tasks.close();
                self.status.set_host_address(Some(format!("Host failed: {e}")));
                self.status.set_connected(false);
                Err(e)
            }
        }
    }

    async fn listen(&self) -> Result<(TcpListener, SocketAddr), HostError> {
        let ip = advertise_ip(self.bind_addr, self.advertise_addr)?;
        let bind = SocketAddr::new(self.bind_addr, self.port);
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| HostError::Bind { addr: bind, source })?;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(self.port);
        Ok((listener, SocketAddr::new(ip, port)))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                r = listener.accept() => r,
            };
            match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted");
                    let this = Arc::clone(&self);
                    self.tasks.spawn(async move { this.handle_client(stream).await });
                }
                Err(e) if is_transient(&e) => debug!(error = %e, "accept interrupted"),
                Err(e) => {
                    error!(error = %e, "accept failed, stopping host");
                    self.state.send_replace(HostState::Stopped);
                    self.shutdown.cancel();
                    self.registry.close_all().await;
                    self.status.set_host_address(Some(format!("Host failed: {e}")));
                    self.status.mark_disconnected();
                    break;
                }
            }
        }
        debug!("listener closed");
    }

    async fn handle_client(&self, stream: TcpStream) {
        let mut conn = match Connection::from_tcp(stream, self.shutdown.child_token()) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cannot set up client connection");
                return;
            }
        };
        let name = match conn.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => guest_name(),
            Ok(Some(line)) => display_name(&line, ""),
            Ok(None) => {
                debug!(peer = %conn.handle().name(), "closed before handshake");
                conn.close().await;
                return;
            }
            Err(e) => {
                debug!(peer = %conn.handle().name(), error = %e, "handshake failed");
                conn.close().await;
                return;
            }
        };
        conn.set_peer_name(&name);
        conn.join(&self.registry).await;
        if self.shutdown.is_cancelled() {
            conn.close().await;
            return;
        }
        let clients = self.registry.len().await;
        info!(peer = %name, clients, "client joined");
        self.relay.announce_join(&name).await;

        let relay = &self.relay;
        let peer = name.as_str();
        let reason = conn.read_loop(move |line| relay.on_line(peer, line)).await;
        let remaining = self.registry.len().await;
        info!(peer = %name, ?reason, remaining, "client disconnected");
    }

    /// Close the listener and every client, wait for their tasks, → Stopped.
    /// Idempotent; no inbound events are delivered after it returns.
    pub async fn stop(&self) {
        let previous = self.state.send_replace(HostState::Stopped);
        self.shutdown.cancel();
        let closed = self.registry.close_all().await;
        self.tasks.close();
        self.tasks.wait().await;
        if previous != HostState::Stopped {
            self.status.set_host_address(None);
            self.status.mark_disconnected();
            info!(closed, "host stopped");
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | Interrupted | WouldBlock
    )
}

/// Address to announce: explicit override, else the bind address, else the
/// local address of the default route.
fn advertise_ip(bind: IpAddr, advertise: Option<IpAddr>) -> Result<IpAddr, HostError> {
    if let Some(ip) = advertise {
        return Ok(ip);
    }
    if !bind.is_unspecified() {
        return Ok(bind);
    }
    route_local_ip().ok_or(HostError::NoNetwork)
}

/// Connecting a UDP socket picks a route without sending anything.
fn route_local_ip() -> Option<IpAddr> {
    let sock = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    sock.connect(("8.8.8.8", 80)).ok()?;
    let ip = sock.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
